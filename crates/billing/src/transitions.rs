//! Subscription state transitions
//!
//! One planner per event category. Each planner is pure: it turns a typed
//! event payload into a bounded [`WriteSet`] describing exactly which
//! fields change, and the persistence applier commits that set in a single
//! transaction. Keeping planning separate from persistence makes the state
//! machine testable without a database.
//!
//! Status machine: `trialing -> active -> past_due -> active` (recovery)
//! `-> canceled/expired`; any live status goes to `expired` on explicit
//! deletion. A fresh `created` event for a user whose subscription already
//! expired is an ordinary upsert, not a resurrection of history.

use time::OffsetDateTime;

use crate::client::PriceIds;
use crate::error::{BillingError, BillingResult};
use crate::events::{InvoiceObject, SubscriptionObject, WebhookEvent};
use crate::tiers::{SubscriptionStatus, SubscriptionTier};

/// Full field set for the created/updated handler. Usage counters are
/// deliberately absent: they are seeded at creation and never reset here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpsert {
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub stripe_price_id: Option<String>,
    pub status: SubscriptionStatus,
    pub tier: SubscriptionTier,
    pub subscribed_apps: Vec<String>,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub cancel_at_period_end: bool,
    pub trial_start: Option<OffsetDateTime>,
    pub trial_end: Option<OffsetDateTime>,
    pub canceled_at: Option<OffsetDateTime>,
    pub cancel_at: Option<OffsetDateTime>,
}

/// The bounded set of field writes a handler may produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateTransition {
    /// Created/updated: create the subscription record if absent,
    /// otherwise overwrite the listed fields; mirror status/tier into the
    /// user projection.
    Upsert(Box<SubscriptionUpsert>),
    /// Deleted: status becomes expired, `canceled_at` is stamped. Tier,
    /// usage, and identifiers stay as a historical record.
    Expire { canceled_at: OffsetDateTime },
    /// Payment succeeded: user projection only; a paid invoice does not by
    /// itself imply an active subscription.
    RecordPayment {
        paid_at: OffsetDateTime,
        amount_cents: i64,
    },
    /// Payment failed: both records become past due
    MarkPastDue,
}

/// A planned transition for one user, tagged with the event that caused it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSet {
    pub event_id: String,
    pub user_id: String,
    /// Stripe's event timestamp; the applier skips this write set if a
    /// newer event has already been applied for the user
    pub occurred_at: OffsetDateTime,
    pub transition: StateTransition,
}

fn instant(unix: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(unix).unwrap_or_else(|_| OffsetDateTime::now_utc())
}

fn opt_instant(unix: Option<i64>) -> Option<OffsetDateTime> {
    unix.map(instant)
}

fn require_user_id(event_id: &str, sub: &SubscriptionObject) -> BillingResult<String> {
    sub.user_id()
        .map(str::to_string)
        .ok_or_else(|| BillingError::MissingUserId {
            event_id: event_id.to_string(),
        })
}

/// Plan the created/updated transition
pub fn plan_subscription_upsert(
    event: &WebhookEvent,
    sub: &SubscriptionObject,
    prices: &PriceIds,
) -> BillingResult<WriteSet> {
    let user_id = require_user_id(&event.id, sub)?;

    let tier = sub
        .price_id()
        .map(|price_id| prices.tier_for_price_id(price_id))
        .unwrap_or(SubscriptionTier::Trial);
    let status = SubscriptionStatus::from_stripe(&sub.status);

    let upsert = SubscriptionUpsert {
        stripe_customer_id: sub.customer.clone(),
        stripe_subscription_id: sub.id.clone(),
        stripe_price_id: sub.price_id().map(str::to_string),
        status,
        tier,
        subscribed_apps: sub.subscribed_apps(),
        current_period_start: instant(sub.current_period_start),
        current_period_end: instant(sub.current_period_end),
        cancel_at_period_end: sub.cancel_at_period_end,
        trial_start: opt_instant(sub.trial_start),
        trial_end: opt_instant(sub.trial_end),
        canceled_at: opt_instant(sub.canceled_at),
        cancel_at: opt_instant(sub.cancel_at),
    };

    Ok(WriteSet {
        event_id: event.id.clone(),
        user_id,
        occurred_at: event.created,
        transition: StateTransition::Upsert(Box::new(upsert)),
    })
}

/// Plan the deleted transition
pub fn plan_subscription_expiry(
    event: &WebhookEvent,
    sub: &SubscriptionObject,
    now: OffsetDateTime,
) -> BillingResult<WriteSet> {
    let user_id = require_user_id(&event.id, sub)?;

    Ok(WriteSet {
        event_id: event.id.clone(),
        user_id,
        occurred_at: event.created,
        transition: StateTransition::Expire { canceled_at: now },
    })
}

/// Plan the payment-succeeded transition. The caller has already resolved
/// `user_id` through the processor lookup.
pub fn plan_payment_recorded(
    event: &WebhookEvent,
    invoice: &InvoiceObject,
    user_id: String,
) -> WriteSet {
    WriteSet {
        event_id: event.id.clone(),
        user_id,
        occurred_at: event.created,
        transition: StateTransition::RecordPayment {
            paid_at: event.created,
            amount_cents: invoice.amount_paid.unwrap_or(0),
        },
    }
}

/// Plan the payment-failed transition
pub fn plan_past_due(event: &WebhookEvent, user_id: String) -> WriteSet {
    WriteSet {
        event_id: event.id.clone(),
        user_id,
        occurred_at: event.created,
        transition: StateTransition::MarkPastDue,
    }
}
