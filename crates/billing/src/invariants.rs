//! Billing invariant checks
//!
//! Runnable consistency checks for the billing pipeline, suitable for
//! running after a webhook replay or on a schedule. Checks only read,
//! never write, and every violation carries enough context to debug.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::BillingResult;

/// A single consistency violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Affected user ids
    pub user_ids: Vec<String>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MirrorMismatchRow {
    user_id: String,
    sub_status: String,
    sub_tier: String,
    user_status: Option<String>,
    user_tier: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ExpiredNoCanceledAtRow {
    user_id: String,
    status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct LimitMismatchRow {
    user_id: String,
    tier: String,
    monthly_query_limit: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ProcessedNoTimestampRow {
    event_id: String,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return a summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_status_tier_mirror().await?);
        violations.extend(self.check_expired_has_canceled_at().await?);
        violations.extend(self.check_limit_matches_tier().await?);
        violations.extend(self.check_processed_has_timestamp().await?);

        let checks_run = 4;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: the (status, tier) tuple on the user projection equals
    /// the subscription record. Both are written in the same transaction,
    /// so a mismatch means a write bypassed the applier.
    async fn check_status_tier_mirror(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MirrorMismatchRow> = sqlx::query_as(
            r#"
            SELECT
                s.user_id,
                s.status AS sub_status,
                s.tier AS sub_tier,
                u.subscription_status AS user_status,
                u.subscription_tier AS user_tier
            FROM subscriptions s
            JOIN users u ON u.id = s.user_id
            WHERE u.subscription_status IS DISTINCT FROM s.status
               OR u.subscription_tier IS DISTINCT FROM s.tier
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "status_tier_mirror".to_string(),
                user_ids: vec![row.user_id.clone()],
                description: format!(
                    "Subscription ({}, {}) and user projection ({:?}, {:?}) disagree",
                    row.sub_status, row.sub_tier, row.user_status, row.user_tier
                ),
                context: serde_json::json!({
                    "subscription_status": row.sub_status,
                    "subscription_tier": row.sub_tier,
                    "user_status": row.user_status,
                    "user_tier": row.user_tier,
                }),
            })
            .collect())
    }

    /// Invariant 2: expired subscriptions record when they were canceled
    async fn check_expired_has_canceled_at(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ExpiredNoCanceledAtRow> = sqlx::query_as(
            r#"
            SELECT user_id, status
            FROM subscriptions
            WHERE status = 'expired' AND canceled_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "expired_has_canceled_at".to_string(),
                user_ids: vec![row.user_id],
                description: "Expired subscription has no canceled_at timestamp".to_string(),
                context: serde_json::json!({ "status": row.status }),
            })
            .collect())
    }

    /// Invariant 3: the seeded query limit matches the tier table
    async fn check_limit_matches_tier(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<LimitMismatchRow> = sqlx::query_as(
            r#"
            SELECT user_id, tier, monthly_query_limit
            FROM subscriptions
            WHERE (tier = 'trial' AND monthly_query_limit != 100)
               OR (tier = 'pro' AND monthly_query_limit != 1000)
               OR (tier = 'premium' AND monthly_query_limit != 10000)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "limit_matches_tier".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Tier '{}' has query limit {} instead of the table value",
                    row.tier, row.monthly_query_limit
                ),
                context: serde_json::json!({
                    "tier": row.tier,
                    "monthly_query_limit": row.monthly_query_limit,
                }),
            })
            .collect())
    }

    /// Invariant 4: processed ledger entries have a processed_at timestamp
    async fn check_processed_has_timestamp(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<ProcessedNoTimestampRow> = sqlx::query_as(
            r#"
            SELECT event_id
            FROM webhook_events
            WHERE processed = TRUE AND processed_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "processed_has_timestamp".to_string(),
                user_ids: vec![],
                description: format!(
                    "Ledger entry {} is processed but has no processed_at",
                    row.event_id
                ),
                context: serde_json::json!({ "event_id": row.event_id }),
            })
            .collect())
    }

    /// Get the names of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "status_tier_mirror",
            "expired_has_canceled_at",
            "limit_matches_tier",
            "processed_has_timestamp",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 4);
        assert!(checks.contains(&"status_tier_mirror"));
        assert!(checks.contains(&"processed_has_timestamp"));
    }
}
