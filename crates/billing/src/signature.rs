//! Webhook signature verification
//!
//! Validates the `Stripe-Signature` header (`t=timestamp,v1=hmac`) against
//! the shared webhook secret before any other processing happens. This is
//! the only thing standing between the pipeline and a forged request that
//! could grant or revoke paid entitlements, so it runs unconditionally and
//! failures produce no side effects.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum allowed age of the signature timestamp, in seconds
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Verify a webhook payload against its signature header.
pub fn verify_signature(payload: &str, signature: &str, secret: &str) -> BillingResult<()> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|_| BillingError::WebhookSignatureInvalid)?
        .as_secs() as i64;
    verify_signature_at(payload, signature, secret, now)
}

fn verify_signature_at(
    payload: &str,
    signature: &str,
    secret: &str,
    now: i64,
) -> BillingResult<()> {
    // Parse the signature header: t=timestamp,v1=signature,v0=signature
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in signature.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0] {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::warn!("Missing v1 signature in signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if (now - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            "Webhook signature timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    // The secret starts with "whsec_"; the remainder is the signing key
    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());

    let expected = hex::decode(&v1_signature).map_err(|_| BillingError::WebhookSignatureInvalid)?;

    // verify_slice is constant-time
    mac.verify_slice(&expected).map_err(|_| {
        tracing::warn!("Webhook signature mismatch");
        BillingError::WebhookSignatureInvalid
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    fn sign(payload: &str, timestamp: i64, secret: &str) -> String {
        let key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={timestamp},v1={sig}")
    }

    #[test]
    fn valid_signature_passes() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, 1_700_000_000, SECRET);
        assert!(verify_signature_at(payload, &header, SECRET, 1_700_000_000).is_ok());
    }

    #[test]
    fn tampered_payload_fails() {
        let header = sign(r#"{"id":"evt_1"}"#, 1_700_000_000, SECRET);
        let result = verify_signature_at(r#"{"id":"evt_2"}"#, &header, SECRET, 1_700_000_000);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn wrong_secret_fails() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, 1_700_000_000, "whsec_other");
        let result = verify_signature_at(payload, &header, SECRET, 1_700_000_000);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn stale_timestamp_fails() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, 1_700_000_000, SECRET);
        let result = verify_signature_at(payload, &header, SECRET, 1_700_000_000 + 301);
        assert!(matches!(result, Err(BillingError::WebhookSignatureInvalid)));
    }

    #[test]
    fn timestamp_within_tolerance_passes() {
        let payload = r#"{"id":"evt_1"}"#;
        let header = sign(payload, 1_700_000_000, SECRET);
        assert!(verify_signature_at(payload, &header, SECRET, 1_700_000_000 + 299).is_ok());
    }

    #[test]
    fn missing_parts_fail() {
        let payload = r#"{"id":"evt_1"}"#;
        for header in ["", "t=1700000000", "v1=deadbeef", "garbage"] {
            let result = verify_signature_at(payload, header, SECRET, 1_700_000_000);
            assert!(
                matches!(result, Err(BillingError::WebhookSignatureInvalid)),
                "header {header:?} should fail"
            );
        }
    }
}
