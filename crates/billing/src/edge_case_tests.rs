// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge case tests for the billing pipeline
//!
//! Exercises the end-to-end scenarios that can be verified without a
//! database: signature rejection, event classification, and the exact
//! field sets each transition planner produces.

mod scenario_tests {
    use time::OffsetDateTime;

    use crate::client::PriceIds;
    use crate::events::{EventKind, EventObject, WebhookEvent};
    use crate::tiers::{SubscriptionStatus, SubscriptionTier};
    use crate::transitions::{
        plan_past_due, plan_subscription_expiry, plan_subscription_upsert, StateTransition,
    };
    use crate::BillingError;

    fn prices() -> PriceIds {
        PriceIds {
            pro_monthly: "price_pro_monthly".into(),
            pro_yearly: "price_pro_yearly".into(),
            premium_monthly: "price_premium_monthly".into(),
            premium_yearly: "price_premium_yearly".into(),
        }
    }

    // =========================================================================
    // Created event with userId, pro price, active status, no trial:
    // the write set must carry (active, pro) for both records
    // =========================================================================
    #[test]
    fn created_event_yields_active_pro_state() {
        let payload = r#"{
            "id": "e1",
            "type": "customer.subscription.created",
            "created": 1700000000,
            "data": {"object": {
                "id": "sub_a", "customer": "cus_a", "status": "active",
                "current_period_start": 1700000000,
                "current_period_end": 1702592000,
                "metadata": {"userId": "u1"},
                "items": {"data": [{"price": {"id": "price_pro_monthly"}}]}
            }}
        }"#;
        let event = WebhookEvent::parse(payload).unwrap();
        let sub = event.subscription().unwrap().clone();
        let ws = plan_subscription_upsert(&event, &sub, &prices()).unwrap();

        assert_eq!(ws.user_id, "u1");
        let StateTransition::Upsert(upsert) = ws.transition else {
            panic!("expected upsert");
        };
        assert_eq!(upsert.status, SubscriptionStatus::Active);
        assert_eq!(upsert.tier, SubscriptionTier::Pro);
        assert!(upsert.trial_start.is_none());
        assert!(!upsert.cancel_at_period_end);
        assert_eq!(
            upsert.current_period_end,
            OffsetDateTime::from_unix_timestamp(1_702_592_000).unwrap()
        );
    }

    // =========================================================================
    // Deleted event: status expired + canceled_at, and nothing else.
    // The prior tier must survive because the transition never mentions it.
    // =========================================================================
    #[test]
    fn deleted_event_expires_without_touching_tier() {
        let payload = r#"{
            "id": "e9",
            "type": "customer.subscription.deleted",
            "created": 1700000500,
            "data": {"object": {
                "id": "sub_b", "customer": "cus_b", "status": "canceled",
                "metadata": {"userId": "u3"},
                "items": {"data": [{"price": {"id": "price_premium_monthly"}}]}
            }}
        }"#;
        let event = WebhookEvent::parse(payload).unwrap();
        let sub = event.subscription().unwrap().clone();
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_600).unwrap();
        let ws = plan_subscription_expiry(&event, &sub, now).unwrap();

        assert_eq!(ws.user_id, "u3");
        // An expiry write set has no tier field at all; premium stays
        assert_eq!(ws.transition, StateTransition::Expire { canceled_at: now });
    }

    // =========================================================================
    // Created event missing metadata.userId: fatal validation error for
    // this event, never a panic
    // =========================================================================
    #[test]
    fn created_event_without_user_id_fails_validation() {
        let payload = r#"{
            "id": "e7",
            "type": "customer.subscription.created",
            "created": 1700000000,
            "data": {"object": {
                "id": "sub_c", "customer": "cus_c", "status": "active",
                "metadata": {},
                "items": {"data": []}
            }}
        }"#;
        let event = WebhookEvent::parse(payload).unwrap();
        let sub = event.subscription().unwrap().clone();
        let err = plan_subscription_upsert(&event, &sub, &prices()).unwrap_err();

        assert!(matches!(err, BillingError::MissingUserId { ref event_id } if event_id == "e7"));
        assert!(err.is_unrecoverable());
        assert!(!err.is_authentication());
    }

    // =========================================================================
    // Payment-failed write set carries only the past_due status change
    // =========================================================================
    #[test]
    fn payment_failed_only_marks_past_due() {
        let payload = r#"{
            "id": "e5",
            "type": "invoice.payment_failed",
            "created": 1700000000,
            "data": {"object": {"id": "in_9", "subscription": "sub_d", "amount_due": 2999}}
        }"#;
        let event = WebhookEvent::parse(payload).unwrap();
        let ws = plan_past_due(&event, "u2".to_string());
        assert_eq!(ws.transition, StateTransition::MarkPastDue);
        assert_eq!(ws.occurred_at, event.created);
    }

    // =========================================================================
    // Unknown event types never raise and never produce a payload shape
    // that could reach a handler
    // =========================================================================
    #[test]
    fn unknown_event_type_is_inert() {
        for type_ in [
            "checkout.session.completed",
            "customer.updated",
            "charge.dispute.created",
            "totally.made.up",
        ] {
            let payload = format!(
                r#"{{"id": "e8", "type": "{type_}", "created": 1700000000,
                     "data": {{"object": {{"weird": [1, 2, 3]}}}}}}"#
            );
            let event = WebhookEvent::parse(&payload).unwrap();
            assert!(matches!(event.kind, EventKind::Other(_)));
            assert!(matches!(event.object, EventObject::Unrecognized));
        }
    }

    // =========================================================================
    // Ordering guard inputs: the write set carries the event timestamp so
    // the applier can compare against last_event_at
    // =========================================================================
    #[test]
    fn write_sets_carry_event_timestamps() {
        let newer = r#"{
            "id": "e10", "type": "invoice.payment_failed", "created": 1700001000,
            "data": {"object": {"id": "in_1", "subscription": "s"}}
        }"#;
        let older = r#"{
            "id": "e11", "type": "invoice.payment_failed", "created": 1700000000,
            "data": {"object": {"id": "in_2", "subscription": "s"}}
        }"#;
        let ws_newer = plan_past_due(&WebhookEvent::parse(newer).unwrap(), "u".into());
        let ws_older = plan_past_due(&WebhookEvent::parse(older).unwrap(), "u".into());
        assert!(ws_older.occurred_at < ws_newer.occurred_at);
    }
}

mod signature_scenarios {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use crate::signature::verify_signature;
    use crate::BillingError;

    const SECRET: &str = "whsec_edge_case_secret";

    fn current_unix() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn sign(payload: &str, timestamp: i64) -> String {
        let key = SECRET.strip_prefix("whsec_").unwrap();
        let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!(
            "t={timestamp},v1={}",
            hex::encode(mac.finalize().into_bytes())
        )
    }

    #[test]
    fn freshly_signed_payload_verifies() {
        let payload = r#"{"id":"evt_ok","type":"x","created":1,"data":{"object":{}}}"#;
        let header = sign(payload, current_unix());
        assert!(verify_signature(payload, &header, SECRET).is_ok());
    }

    // Invalid signature must be rejected before any side effect; the
    // caller turns this into a 400 and no ledger entry exists
    #[test]
    fn forged_signature_is_rejected() {
        let payload = r#"{"id":"evt_forged"}"#;
        let header = format!("t={},v1={}", current_unix(), "ab".repeat(32));
        let result = verify_signature(payload, &header, SECRET);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn replayed_old_header_is_rejected() {
        let payload = r#"{"id":"evt_old"}"#;
        let header = sign(payload, current_unix() - 3600);
        let result = verify_signature(payload, &header, SECRET);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }
}
