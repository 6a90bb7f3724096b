//! Stripe webhook handling
//!
//! Orchestrates the pipeline: signature verification, idempotency claim,
//! dispatch to the state transition planner for the event category, atomic
//! persistence, and ledger completion. Unrecognized event types are
//! acknowledged as no-ops so the sender never retries them.

use time::OffsetDateTime;

use crate::apply::PersistenceApplier;
use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::events::{EventKind, WebhookEvent};
use crate::ledger::{IdempotencyLedger, LedgerClaim};
use crate::signature::verify_signature;
use crate::transitions::{
    plan_past_due, plan_payment_recorded, plan_subscription_expiry, plan_subscription_upsert,
};

/// Which handler a dispatched event runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    SubscriptionUpsert,
    SubscriptionExpiry,
    PaymentRecorded,
    PastDue,
    /// Acknowledge without any state change
    Acknowledge,
}

/// Pure routing: every recognized type selects exactly one handler;
/// everything else is acknowledged.
fn route(kind: &EventKind) -> Route {
    match kind {
        EventKind::SubscriptionCreated | EventKind::SubscriptionUpdated => {
            Route::SubscriptionUpsert
        }
        EventKind::SubscriptionDeleted => Route::SubscriptionExpiry,
        EventKind::PaymentSucceeded => Route::PaymentRecorded,
        EventKind::PaymentFailed => Route::PastDue,
        EventKind::Other(_) => Route::Acknowledge,
    }
}

/// Result of replaying a stored webhook event
#[derive(Debug, Clone)]
pub struct WebhookReplayResult {
    pub event_id: String,
    pub event_type: String,
    pub succeeded: bool,
    pub error: Option<String>,
}

/// Webhook handler for Stripe billing events
pub struct WebhookHandler {
    stripe: StripeClient,
    ledger: IdempotencyLedger,
    applier: PersistenceApplier,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: sqlx::PgPool) -> Self {
        Self {
            stripe,
            ledger: IdempotencyLedger::new(pool.clone()),
            applier: PersistenceApplier::new(pool),
        }
    }

    pub fn ledger(&self) -> &IdempotencyLedger {
        &self.ledger
    }

    /// Verify and parse a webhook payload.
    ///
    /// Must run before anything else; a failed signature produces no
    /// ledger entry and no handler invocation.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<WebhookEvent> {
        verify_signature(payload, signature, &self.stripe.config().webhook_secret)?;
        WebhookEvent::parse(payload)
    }

    /// Handle a verified event exactly once.
    ///
    /// The ledger claim is atomic, so concurrent deliveries of the same
    /// event id cannot both reach a handler. Success here means the event
    /// is durably applied (or was already); the caller responds 200.
    /// Errors leave the ledger entry unprocessed with the error recorded,
    /// and the caller responds 500 so the sender retries. An in-flight
    /// duplicate is acknowledged too; if the active claim later fails,
    /// the entry surfaces via [`IdempotencyLedger::failed_events`] and can
    /// be re-run with [`Self::replay_event`].
    pub async fn handle_event(&self, event: &WebhookEvent, raw_payload: &str) -> BillingResult<()> {
        match self.ledger.check_and_register(event, raw_payload).await? {
            LedgerClaim::Claimed => {}
            LedgerClaim::AlreadyProcessed | LedgerClaim::InFlight => return Ok(()),
        }

        tracing::info!(
            event_id = %event.id,
            event_type = %event.kind.as_str(),
            "Processing webhook event (claimed exclusive processing rights)"
        );

        let result = self.process_event_internal(event).await;

        match &result {
            Ok(()) => self.ledger.mark_complete(&event.id).await?,
            Err(e) => {
                tracing::error!(
                    event_id = %event.id,
                    event_type = %event.kind.as_str(),
                    error = %e,
                    "Webhook event processing failed"
                );
                // Best effort: the error annotation matters for triage but
                // must not mask the original failure
                if let Err(ledger_err) = self.ledger.mark_failed(&event.id, &e.to_string()).await {
                    tracing::error!(
                        event_id = %event.id,
                        error = %ledger_err,
                        "Failed to record processing error on ledger entry"
                    );
                }
            }
        }

        result
    }

    async fn process_event_internal(&self, event: &WebhookEvent) -> BillingResult<()> {
        match route(&event.kind) {
            Route::SubscriptionUpsert => self.handle_subscription_upsert(event).await,
            Route::SubscriptionExpiry => self.handle_subscription_expiry(event).await,
            Route::PaymentRecorded => self.handle_payment_succeeded(event).await,
            Route::PastDue => self.handle_payment_failed(event).await,
            Route::Acknowledge => {
                // Track which events arrive without a handler; helps spot
                // new types worth handling
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.kind.as_str(),
                    "Unrecognized event type - acknowledged without state change"
                );
                Ok(())
            }
        }
    }

    async fn handle_subscription_upsert(&self, event: &WebhookEvent) -> BillingResult<()> {
        let sub = event.subscription()?;
        let ws = plan_subscription_upsert(event, sub, &self.stripe.config().price_ids)?;
        let outcome = self.applier.apply(&ws).await?;

        tracing::info!(
            event_id = %event.id,
            user_id = %ws.user_id,
            subscription_id = %sub.id,
            outcome = ?outcome,
            "Subscription synced"
        );
        Ok(())
    }

    async fn handle_subscription_expiry(&self, event: &WebhookEvent) -> BillingResult<()> {
        let sub = event.subscription()?;
        let ws = plan_subscription_expiry(event, sub, OffsetDateTime::now_utc())?;
        let outcome = self.applier.apply(&ws).await?;

        tracing::info!(
            event_id = %event.id,
            user_id = %ws.user_id,
            subscription_id = %sub.id,
            outcome = ?outcome,
            "Subscription expired"
        );
        Ok(())
    }

    async fn handle_payment_succeeded(&self, event: &WebhookEvent) -> BillingResult<()> {
        let invoice = event.invoice()?;
        let Some(subscription_id) = invoice.subscription.as_deref() else {
            // One-off invoices carry no subscription and nothing for us to
            // record against a user
            tracing::info!(
                event_id = %event.id,
                invoice_id = %invoice.id,
                "Invoice has no subscription - nothing to record"
            );
            return Ok(());
        };

        let user_id = self.stripe.user_id_for_subscription(subscription_id).await?;
        let ws = plan_payment_recorded(event, invoice, user_id);
        self.applier.apply(&ws).await?;

        tracing::info!(
            event_id = %event.id,
            user_id = %ws.user_id,
            invoice_id = %invoice.id,
            amount_cents = invoice.amount_paid.unwrap_or(0),
            "Payment recorded"
        );
        Ok(())
    }

    async fn handle_payment_failed(&self, event: &WebhookEvent) -> BillingResult<()> {
        let invoice = event.invoice()?;
        let Some(subscription_id) = invoice.subscription.as_deref() else {
            tracing::info!(
                event_id = %event.id,
                invoice_id = %invoice.id,
                "Failed invoice has no subscription - nothing to mark"
            );
            return Ok(());
        };

        let user_id = self.stripe.user_id_for_subscription(subscription_id).await?;
        let ws = plan_past_due(event, user_id);
        let outcome = self.applier.apply(&ws).await?;

        tracing::warn!(
            event_id = %event.id,
            user_id = %ws.user_id,
            invoice_id = %invoice.id,
            amount_cents = invoice.amount_due.unwrap_or(0),
            outcome = ?outcome,
            "Invoice payment failed - subscription marked past due"
        );
        Ok(())
    }

    /// Re-run a stored event's raw payload through dispatch.
    ///
    /// Only unprocessed entries are eligible; re-applying a processed
    /// event is exactly what the ledger exists to prevent.
    pub async fn replay_event(&self, event_id: &str) -> BillingResult<WebhookReplayResult> {
        let record = self.ledger.find(event_id).await?.ok_or_else(|| {
            BillingError::ReplayRejected(event_id.to_string(), "no ledger entry".to_string())
        })?;

        if record.processed {
            return Err(BillingError::ReplayRejected(
                event_id.to_string(),
                "already processed".to_string(),
            ));
        }

        let raw = record.raw_payload.to_string();
        let event = WebhookEvent::parse(&raw)?;
        let result = self.process_event_internal(&event).await;

        match &result {
            Ok(()) => {
                self.ledger.mark_complete(event_id).await?;
                Ok(WebhookReplayResult {
                    event_id: event_id.to_string(),
                    event_type: record.event_type,
                    succeeded: true,
                    error: None,
                })
            }
            Err(e) => {
                let message = e.to_string();
                self.ledger.mark_failed(event_id, &message).await?;
                Ok(WebhookReplayResult {
                    event_id: event_id.to_string(),
                    event_type: record.event_type,
                    succeeded: false,
                    error: Some(message),
                })
            }
        }
    }
}
