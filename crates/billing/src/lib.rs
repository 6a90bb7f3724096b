// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Daybook Billing Module
//!
//! Handles Stripe webhook events for the Daybook subscription lifecycle.
//!
//! ## Pipeline
//!
//! - **Signature Verification**: Authenticate every inbound payload
//!   against the shared webhook secret before any side effect
//! - **Idempotency Ledger**: Durable per-event record with an atomic
//!   claim, so each event is applied exactly once despite retries and
//!   duplicate delivery
//! - **Event Dispatch**: Typed event envelope routed to one handler per
//!   event category; unknown types are acknowledged no-ops
//! - **State Transitions**: Pure planners producing bounded write sets for
//!   subscription status/tier changes
//! - **Atomic Persistence**: Each write set commits in one transaction
//!   spanning the subscription record and the user billing projection
//! - **Replay & Invariants**: Failed events can be replayed from their
//!   stored payload; consistency checks are runnable SQL

pub mod apply;
pub mod client;
pub mod error;
pub mod events;
pub mod invariants;
pub mod ledger;
pub mod signature;
pub mod tiers;
pub mod transitions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Apply
pub use apply::{ApplyOutcome, PersistenceApplier};

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{EventKind, EventObject, InvoiceObject, SubscriptionObject, WebhookEvent};

// Invariants
pub use invariants::{InvariantCheckSummary, InvariantChecker, InvariantViolation};

// Ledger
pub use ledger::{IdempotencyLedger, LedgerClaim, WebhookEventRecord};

// Signature
pub use signature::verify_signature;

// Tiers
pub use tiers::{query_limit_for_tier, SubscriptionStatus, SubscriptionTier};

// Transitions
pub use transitions::{StateTransition, SubscriptionUpsert, WriteSet};

// Webhooks
pub use webhooks::{WebhookHandler, WebhookReplayResult};

use sqlx::PgPool;

/// Main billing service that combines the pipeline components
pub struct BillingService {
    pub webhooks: WebhookHandler,
    pub invariants: InvariantChecker,
}

impl BillingService {
    /// Create a billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::new(stripe, pool))
    }

    /// Create a billing service with an explicit Stripe client
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            webhooks: WebhookHandler::new(stripe, pool.clone()),
            invariants: InvariantChecker::new(pool),
        }
    }
}
