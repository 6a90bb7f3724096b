//! API error responses
//!
//! Maps the billing error taxonomy onto the webhook response contract:
//! authentication failures are 400 (resending cannot fix a bad
//! signature), everything after authentication is 500 so the sender
//! retries.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use daybook_billing::BillingError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        if err.is_authentication() {
            ApiError::BadRequest("Invalid webhook signature".to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_failures_map_to_400() {
        let err: ApiError = BillingError::WebhookSignatureInvalid.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn processing_failures_map_to_500() {
        for billing_err in [
            BillingError::MissingUserId {
                event_id: "e1".into(),
            },
            BillingError::Database("connection reset".into()),
            BillingError::StripeApi("timeout".into()),
            BillingError::WebhookEventNotSupported("bad shape".into()),
        ] {
            let err: ApiError = billing_err.into();
            assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
