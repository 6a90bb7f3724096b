//! Billing error types

use thiserror::Error;

/// Result alias for billing operations
pub type BillingResult<T> = Result<T, BillingError>;

/// Errors produced by the billing event pipeline
#[derive(Debug, Error)]
pub enum BillingError {
    /// Webhook signature header is missing, malformed, stale, or does not
    /// match the shared secret. Rejected at the boundary before any side
    /// effect; retrying the same payload can never succeed.
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// The event payload could not be parsed into the expected shape
    #[error("webhook event not supported: {0}")]
    WebhookEventNotSupported(String),

    /// Required `userId` metadata is absent from the event. Fatal for this
    /// event: the ledger entry keeps the error and the sender will retry,
    /// but retries cannot succeed until the upstream data is fixed.
    #[error("event {event_id} is missing userId metadata")]
    MissingUserId { event_id: String },

    /// Outbound Stripe API call failed
    #[error("stripe API error: {0}")]
    StripeApi(String),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(String),

    /// A replay was requested for an event that is not eligible
    #[error("event {0} cannot be replayed: {1}")]
    ReplayRejected(String, String),

    /// Catch-all for internal inconsistencies
    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// True when the failure is an authentication failure that must be
    /// rejected before any ledger entry or handler runs.
    pub fn is_authentication(&self) -> bool {
        matches!(self, BillingError::WebhookSignatureInvalid)
    }

    /// True when a retry of the same event cannot succeed without an
    /// upstream data fix (validation failures).
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, BillingError::MissingUserId { .. })
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::StripeApi(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_failure_is_authentication() {
        assert!(BillingError::WebhookSignatureInvalid.is_authentication());
        assert!(!BillingError::Database("down".into()).is_authentication());
    }

    #[test]
    fn missing_user_id_is_unrecoverable() {
        let err = BillingError::MissingUserId {
            event_id: "evt_1".into(),
        };
        assert!(err.is_unrecoverable());
        assert!(!BillingError::StripeApi("timeout".into()).is_unrecoverable());
    }
}
