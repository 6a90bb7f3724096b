//! Typed webhook event envelope
//!
//! Stripe delivers events as `{id, type, created, data: {object}}` where
//! the shape of `data.object` depends on `type`. Rather than narrowing an
//! untyped value inside each handler, the envelope is parsed up front into
//! a tagged union with one concrete payload shape per event category.
//! Unknown types are legal: they parse into [`EventKind::Other`] with an
//! unrecognized object and are acknowledged without any state change.

use std::collections::HashMap;

use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

/// Event categories this pipeline recognizes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    PaymentSucceeded,
    PaymentFailed,
    /// Any type outside the recognized set; always a no-op
    Other(String),
}

impl EventKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "customer.subscription.created" => EventKind::SubscriptionCreated,
            "customer.subscription.updated" => EventKind::SubscriptionUpdated,
            "customer.subscription.deleted" => EventKind::SubscriptionDeleted,
            "invoice.payment_succeeded" => EventKind::PaymentSucceeded,
            "invoice.payment_failed" => EventKind::PaymentFailed,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::SubscriptionCreated => "customer.subscription.created",
            EventKind::SubscriptionUpdated => "customer.subscription.updated",
            EventKind::SubscriptionDeleted => "customer.subscription.deleted",
            EventKind::PaymentSucceeded => "invoice.payment_succeeded",
            EventKind::PaymentFailed => "invoice.payment_failed",
            EventKind::Other(s) => s,
        }
    }
}

/// `data.object` for subscription lifecycle events
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    #[serde(default)]
    pub customer: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    #[serde(default)]
    pub current_period_start: i64,
    #[serde(default)]
    pub current_period_end: i64,
    #[serde(default)]
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub cancel_at: Option<i64>,
    #[serde(default)]
    pub trial_start: Option<i64>,
    #[serde(default)]
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: SubscriptionItemList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItemList {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: Price,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
}

impl SubscriptionObject {
    /// Price id of the first subscription item, if any
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.metadata.get("userId").map(String::as_str)
    }

    /// App identifiers from metadata, comma-separated. Empty means the
    /// subscription covers all Daybook apps.
    pub fn subscribed_apps(&self) -> Vec<String> {
        self.metadata
            .get("apps")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// `data.object` for invoice payment events
#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub amount_paid: Option<i64>,
    #[serde(default)]
    pub amount_due: Option<i64>,
}

/// Payload variant selected by the event type
#[derive(Debug, Clone)]
pub enum EventObject {
    Subscription(SubscriptionObject),
    Invoice(InvoiceObject),
    Unrecognized,
}

/// A parsed, verified webhook event
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: String,
    pub kind: EventKind,
    /// Stripe's event timestamp, used for the last-writer-wins ordering
    /// guard in the persistence applier
    pub created: OffsetDateTime,
    pub object: EventObject,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    id: String,
    #[serde(rename = "type")]
    type_: String,
    // Required: a zero default would make every derived write set look
    // maximally stale to the ordering guard
    created: i64,
    #[serde(default)]
    data: RawData,
}

#[derive(Debug, Default, Deserialize)]
struct RawData {
    #[serde(default)]
    object: serde_json::Value,
}

impl WebhookEvent {
    /// Parse an event envelope from a raw webhook body.
    ///
    /// Only the envelope itself and the payload shape for the recognized
    /// kind are validated; events of unrecognized types always parse.
    pub fn parse(payload: &str) -> BillingResult<Self> {
        let raw: RawEnvelope = serde_json::from_str(payload)
            .map_err(|e| BillingError::WebhookEventNotSupported(format!("bad envelope: {e}")))?;

        let kind = EventKind::parse(&raw.type_);

        let object = match kind {
            EventKind::SubscriptionCreated
            | EventKind::SubscriptionUpdated
            | EventKind::SubscriptionDeleted => {
                let sub: SubscriptionObject =
                    serde_json::from_value(raw.data.object).map_err(|e| {
                        BillingError::WebhookEventNotSupported(format!(
                            "expected subscription object: {e}"
                        ))
                    })?;
                EventObject::Subscription(sub)
            }
            EventKind::PaymentSucceeded | EventKind::PaymentFailed => {
                let invoice: InvoiceObject =
                    serde_json::from_value(raw.data.object).map_err(|e| {
                        BillingError::WebhookEventNotSupported(format!(
                            "expected invoice object: {e}"
                        ))
                    })?;
                EventObject::Invoice(invoice)
            }
            EventKind::Other(_) => EventObject::Unrecognized,
        };

        let created = OffsetDateTime::from_unix_timestamp(raw.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        Ok(WebhookEvent {
            id: raw.id,
            kind,
            created,
            object,
        })
    }

    pub fn subscription(&self) -> BillingResult<&SubscriptionObject> {
        match &self.object {
            EventObject::Subscription(sub) => Ok(sub),
            _ => Err(BillingError::WebhookEventNotSupported(
                "expected subscription payload".to_string(),
            )),
        }
    }

    pub fn invoice(&self) -> BillingResult<&InvoiceObject> {
        match &self.object {
            EventObject::Invoice(invoice) => Ok(invoice),
            _ => Err(BillingError::WebhookEventNotSupported(
                "expected invoice payload".to_string(),
            )),
        }
    }
}
