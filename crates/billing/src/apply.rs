//! Atomic persistence applier
//!
//! Commits a [`WriteSet`] as one Postgres transaction spanning the
//! subscription record and the user billing projection, so a reader can
//! never observe one updated and the other stale. The subscription row is
//! locked up front; the create-vs-update decision and the last-writer-wins
//! ordering check both happen under that lock.

use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::tiers::{SubscriptionStatus, SubscriptionTier};
use crate::transitions::{StateTransition, SubscriptionUpsert, WriteSet};

/// What the applier did with a write set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new subscription record was created
    Created,
    /// Existing records were updated
    Updated,
    /// A newer event was already applied for this user; nothing written.
    /// Stale events are still acknowledged as processed.
    StaleSkipped,
    /// No subscription record exists for this user; only applicable to
    /// non-creation transitions, logged for follow-up
    MissingSubscription,
}

/// Whether a transition is subject to the `last_event_at` ordering guard.
/// Payment recording is not status-bearing and carries its own monotonic
/// guard on `last_payment_date`; a renewal payment sharing a `created`
/// second with the subscription update must still be recorded.
fn guarded_by_event_order(transition: &StateTransition) -> bool {
    !matches!(transition, StateTransition::RecordPayment { .. })
}

#[derive(Clone)]
pub struct PersistenceApplier {
    pool: PgPool,
}

impl PersistenceApplier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply a write set atomically. Either every write commits or none do.
    pub async fn apply(&self, ws: &WriteSet) -> BillingResult<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;

        // Lock the subscription row for the duration of the transaction.
        // Concurrent handlers for the same user serialize here.
        let existing: Option<(Uuid, Option<OffsetDateTime>)> = sqlx::query_as(
            "SELECT id, last_event_at FROM subscriptions WHERE user_id = $1 FOR UPDATE",
        )
        .bind(&ws.user_id)
        .fetch_optional(&mut *tx)
        .await?;

        // Ordering guard: the sender does not guarantee in-order delivery.
        // A status-bearing write set older than the last applied event must
        // not regress state (e.g. a late past_due un-canceling an expired
        // record).
        if guarded_by_event_order(&ws.transition) {
            if let Some((_, Some(last_event_at))) = existing {
                if ws.occurred_at <= last_event_at {
                    tracing::info!(
                        user_id = %ws.user_id,
                        event_id = %ws.event_id,
                        event_at = %ws.occurred_at,
                        last_applied_at = %last_event_at,
                        "Skipping stale event - newer event already applied"
                    );
                    return Ok(ApplyOutcome::StaleSkipped);
                }
            }
        }

        let outcome = match &ws.transition {
            StateTransition::Upsert(upsert) => {
                self.apply_upsert(&mut tx, ws, upsert, existing.map(|(id, _)| id))
                    .await?
            }
            StateTransition::Expire { canceled_at } => {
                self.apply_status_change(
                    &mut tx,
                    ws,
                    SubscriptionStatus::Expired,
                    Some(*canceled_at),
                    existing.is_some(),
                )
                .await?
            }
            StateTransition::MarkPastDue => {
                self.apply_status_change(
                    &mut tx,
                    ws,
                    SubscriptionStatus::PastDue,
                    None,
                    existing.is_some(),
                )
                .await?
            }
            StateTransition::RecordPayment {
                paid_at,
                amount_cents,
            } => {
                // Payment fields live only on the user projection; a paid
                // invoice does not change subscription status. The
                // projection row may not exist yet when the payment event
                // outruns the subscription event, so this is an upsert.
                let result = sqlx::query(
                    r#"
                    INSERT INTO users (id, last_payment_date, last_payment_amount_cents, updated_at)
                    VALUES ($1, $2, $3, NOW())
                    ON CONFLICT (id) DO UPDATE SET
                        last_payment_date = EXCLUDED.last_payment_date,
                        last_payment_amount_cents = EXCLUDED.last_payment_amount_cents,
                        updated_at = NOW()
                    WHERE users.last_payment_date IS NULL
                       OR users.last_payment_date < EXCLUDED.last_payment_date
                    "#,
                )
                .bind(&ws.user_id)
                .bind(paid_at)
                .bind(amount_cents)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    // A newer payment is already on record
                    ApplyOutcome::StaleSkipped
                } else {
                    ApplyOutcome::Updated
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn apply_upsert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ws: &WriteSet,
        upsert: &SubscriptionUpsert,
        existing_id: Option<Uuid>,
    ) -> BillingResult<ApplyOutcome> {
        let outcome = match existing_id {
            None => {
                // First observation of this user's subscription: seed
                // zeroed usage counters and the tier-derived query limit
                sqlx::query(
                    r#"
                    INSERT INTO subscriptions (
                        id, user_id, stripe_customer_id, stripe_subscription_id,
                        stripe_price_id, status, tier, subscribed_apps,
                        current_period_start, current_period_end, cancel_at_period_end,
                        trial_start, trial_end, canceled_at, cancel_at,
                        usage_queries, usage_tokens, usage_cost_cents, usage_last_reset,
                        monthly_query_limit, last_event_at, created_at, updated_at
                    ) VALUES (
                        $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                        0, 0, 0, NOW(), $16, $17, NOW(), NOW()
                    )
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(&ws.user_id)
                .bind(&upsert.stripe_customer_id)
                .bind(&upsert.stripe_subscription_id)
                .bind(&upsert.stripe_price_id)
                .bind(upsert.status.as_str())
                .bind(upsert.tier.as_str())
                .bind(&upsert.subscribed_apps)
                .bind(upsert.current_period_start)
                .bind(upsert.current_period_end)
                .bind(upsert.cancel_at_period_end)
                .bind(upsert.trial_start)
                .bind(upsert.trial_end)
                .bind(upsert.canceled_at)
                .bind(upsert.cancel_at)
                .bind(upsert.tier.monthly_query_limit())
                .bind(ws.occurred_at)
                .execute(&mut **tx)
                .await?;
                ApplyOutcome::Created
            }
            Some(_) => {
                // Update only the event-driven fields; usage counters and
                // creation-time seeds are untouched
                sqlx::query(
                    r#"
                    UPDATE subscriptions SET
                        stripe_customer_id = $2,
                        stripe_subscription_id = $3,
                        stripe_price_id = $4,
                        status = $5,
                        tier = $6,
                        subscribed_apps = $7,
                        current_period_start = $8,
                        current_period_end = $9,
                        cancel_at_period_end = $10,
                        trial_start = $11,
                        trial_end = $12,
                        canceled_at = $13,
                        cancel_at = $14,
                        last_event_at = $15,
                        updated_at = NOW()
                    WHERE user_id = $1
                    "#,
                )
                .bind(&ws.user_id)
                .bind(&upsert.stripe_customer_id)
                .bind(&upsert.stripe_subscription_id)
                .bind(&upsert.stripe_price_id)
                .bind(upsert.status.as_str())
                .bind(upsert.tier.as_str())
                .bind(&upsert.subscribed_apps)
                .bind(upsert.current_period_start)
                .bind(upsert.current_period_end)
                .bind(upsert.cancel_at_period_end)
                .bind(upsert.trial_start)
                .bind(upsert.trial_end)
                .bind(upsert.canceled_at)
                .bind(upsert.cancel_at)
                .bind(ws.occurred_at)
                .execute(&mut **tx)
                .await?;
                ApplyOutcome::Updated
            }
        };

        // Mirror into the user projection in the same transaction. The
        // (status, tier) tuple must match the subscription record exactly.
        sqlx::query(
            r#"
            INSERT INTO users (
                id, subscription_status, subscription_tier,
                stripe_customer_id, stripe_subscription_id,
                subscription_expires_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (id) DO UPDATE SET
                subscription_status = EXCLUDED.subscription_status,
                subscription_tier = EXCLUDED.subscription_tier,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                subscription_expires_at = EXCLUDED.subscription_expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(&ws.user_id)
        .bind(upsert.status.as_str())
        .bind(upsert.tier.as_str())
        .bind(&upsert.stripe_customer_id)
        .bind(&upsert.stripe_subscription_id)
        .bind(upsert.current_period_end)
        .execute(&mut **tx)
        .await?;

        // subscribed_apps is written only when non-empty; empty means the
        // subscription covers all apps and the projection keeps its value
        if !upsert.subscribed_apps.is_empty() {
            sqlx::query("UPDATE users SET subscribed_apps = $2 WHERE id = $1")
                .bind(&ws.user_id)
                .bind(&upsert.subscribed_apps)
                .execute(&mut **tx)
                .await?;
        }

        Ok(outcome)
    }

    /// Shared body for the deleted and payment-failed transitions: a
    /// status write mirrored to both records, nothing else.
    async fn apply_status_change(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        ws: &WriteSet,
        status: SubscriptionStatus,
        canceled_at: Option<OffsetDateTime>,
        subscription_exists: bool,
    ) -> BillingResult<ApplyOutcome> {
        if !subscription_exists {
            tracing::warn!(
                user_id = %ws.user_id,
                event_id = %ws.event_id,
                status = %status,
                "Status change for user with no subscription record"
            );
            return Ok(ApplyOutcome::MissingSubscription);
        }

        sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = $2,
                canceled_at = COALESCE($3, canceled_at),
                last_event_at = $4,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(&ws.user_id)
        .bind(status.as_str())
        .bind(canceled_at)
        .bind(ws.occurred_at)
        .execute(&mut **tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE users SET subscription_status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(&ws.user_id)
        .bind(status.as_str())
        .execute(&mut **tx)
        .await?;

        Ok(ApplyOutcome::Updated)
    }
}
