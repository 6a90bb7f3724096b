//! Idempotency ledger
//!
//! Durable per-event record keyed by the Stripe event id. The claim is a
//! single atomic INSERT ... ON CONFLICT ... RETURNING statement, so two
//! concurrent deliveries of the same event id can never both acquire
//! processing rights. Ledger entries are never deleted; once an entry is
//! marked processed, no handler runs again for that id.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::events::WebhookEvent;

/// How long a claimed-but-unfinished event blocks re-claims. Covers the
/// case where a process died mid-handler and left the entry in flight.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Outcome of attempting to claim an event for processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerClaim {
    /// We hold exclusive processing rights for this event
    Claimed,
    /// The event was already durably applied; skip all further work
    AlreadyProcessed,
    /// Another invocation is processing this event right now
    InFlight,
}

/// A ledger entry, as stored
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookEventRecord {
    pub event_id: String,
    pub event_type: String,
    pub raw_payload: serde_json::Value,
    pub processed: bool,
    pub processed_at: Option<OffsetDateTime>,
    pub error: Option<String>,
    pub event_timestamp: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// Durable record of which events have already been applied
#[derive(Clone)]
pub struct IdempotencyLedger {
    pool: PgPool,
}

impl IdempotencyLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically claim exclusive processing rights for an event.
    ///
    /// The insert succeeds for a fresh event id. The conditional update
    /// re-claims entries whose previous attempt failed (error recorded) or
    /// that have been stuck in flight past the timeout. In every other
    /// case no row is returned and the caller must not process the event.
    pub async fn check_and_register(
        &self,
        event: &WebhookEvent,
        raw_payload: &str,
    ) -> BillingResult<LedgerClaim> {
        let payload: serde_json::Value = serde_json::from_str(raw_payload)
            .map_err(|e| BillingError::Internal(format!("unparseable ledger payload: {e}")))?;

        let claimed: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO webhook_events
                (event_id, event_type, raw_payload, processed, event_timestamp,
                 processing_started_at, created_at)
            VALUES ($1, $2, $3, FALSE, $4, NOW(), NOW())
            ON CONFLICT (event_id) DO UPDATE SET
                error = NULL,
                processing_started_at = NOW()
            WHERE webhook_events.processed = FALSE
              AND (webhook_events.error IS NOT NULL
                   OR webhook_events.processing_started_at
                      < NOW() - ($5 || ' minutes')::INTERVAL)
            RETURNING event_id
            "#,
        )
        .bind(&event.id)
        .bind(event.kind.as_str())
        .bind(&payload)
        .bind(event.created)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            return Ok(LedgerClaim::Claimed);
        }

        // No claim: distinguish "already applied" from "another worker is
        // on it" for logging and the response path.
        let existing: Option<(bool,)> =
            sqlx::query_as("SELECT processed FROM webhook_events WHERE event_id = $1")
                .bind(&event.id)
                .fetch_optional(&self.pool)
                .await?;

        match existing {
            Some((true,)) => {
                tracing::info!(
                    event_id = %event.id,
                    event_type = %event.kind.as_str(),
                    "Duplicate webhook event - already processed"
                );
                Ok(LedgerClaim::AlreadyProcessed)
            }
            Some((false,)) => {
                tracing::info!(
                    event_id = %event.id,
                    "Duplicate webhook event - currently in flight"
                );
                Ok(LedgerClaim::InFlight)
            }
            // Row vanished between statements; ledger rows are never
            // deleted, so treat as a concurrent claim.
            None => Ok(LedgerClaim::InFlight),
        }
    }

    /// Mark an event as durably applied
    pub async fn mark_complete(&self, event_id: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET processed = TRUE, processed_at = NOW(), error = NULL
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a failed processing attempt; the entry stays unprocessed so
    /// a retry can claim it again.
    pub async fn mark_failed(&self, event_id: &str, error: &str) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET error = $2
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a ledger entry by event id
    pub async fn find(&self, event_id: &str) -> BillingResult<Option<WebhookEventRecord>> {
        let record: Option<WebhookEventRecord> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, raw_payload, processed, processed_at,
                   error, event_timestamp, created_at
            FROM webhook_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// List unprocessed entries with a recorded error, oldest first
    pub async fn failed_events(&self, limit: i64) -> BillingResult<Vec<WebhookEventRecord>> {
        let records: Vec<WebhookEventRecord> = sqlx::query_as(
            r#"
            SELECT event_id, event_type, raw_payload, processed, processed_at,
                   error, event_timestamp, created_at
            FROM webhook_events
            WHERE processed = FALSE AND error IS NOT NULL
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
