//! Stripe webhook endpoint
//!
//! Receives the raw request body (not extracted JSON - the signature is
//! computed over the exact bytes) plus the `stripe-signature` header.
//! Responses follow the retry contract: 200 means the event is durably
//! applied or was already, 400 means authentication failed and resending
//! is pointless, 500 means processing failed and the sender should retry.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let payload = std::str::from_utf8(&body)
        .map_err(|_| ApiError::BadRequest("Request body is not valid UTF-8".to_string()))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing stripe-signature header".to_string())
        })?;

    // Authentication happens before any side effect; a rejected payload
    // leaves no ledger entry
    let event = state.billing.webhooks.verify_event(payload, signature)?;

    tracing::info!(
        event_id = %event.id,
        event_type = %event.kind.as_str(),
        "Stripe webhook event verified"
    );

    state.billing.webhooks.handle_event(&event, payload).await?;

    Ok(StatusCode::OK)
}
