//! Webhook signature verification protocol.
//!
//! The gateway signs a manifest string of the form
//! `id:<eventDataId>;request-id:<requestId>;ts:<timestamp>;` with
//! HMAC-SHA256 over a shared secret. The signature arrives in the
//! `x-signature` header as comma-separated `key=value` pairs carrying `ts`
//! and `v1` (hex-encoded MAC); the request id arrives in `x-request-id`;
//! the event data id is taken from the notification body.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-signature";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Parsed `x-signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub ts: String,
    pub v1: String,
}

impl SignatureHeader {
    /// Parses `ts=...,v1=...`. Order of pairs is not significant; unknown
    /// keys are ignored. Missing `ts` or `v1` is a malformed signature.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut ts = None;
        let mut v1 = None;
        for part in raw.split(',') {
            let mut it = part.trim().splitn(2, '=');
            match (it.next(), it.next()) {
                (Some("ts"), Some(val)) if !val.is_empty() => ts = Some(val.to_string()),
                (Some("v1"), Some(val)) if !val.is_empty() => v1 = Some(val.to_string()),
                _ => {}
            }
        }
        Some(Self { ts: ts?, v1: v1? })
    }
}

/// Canonical byte sequence that is HMAC-signed.
pub fn build_manifest(data_id: &str, request_id: &str, ts: &str) -> String {
    format!("id:{};request-id:{};ts:{};", data_id, request_id, ts)
}

/// Hex-encoded HMAC-SHA256 of `manifest` under `secret`. Used by tests and
/// outbound tooling as well as verification.
pub fn sign_manifest(secret: &str, manifest: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(manifest.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Recomputes the MAC over the manifest and compares against the supplied
/// `v1` in constant time.
pub fn verify_signature(secret: &str, manifest: &str, v1: &str) -> bool {
    let expected = sign_manifest(secret, manifest);
    constant_time_eq(expected.as_bytes(), v1.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.iter().zip(b) {
        res |= x ^ y;
    }
    res == 0
}

/// Notification body, validated at the boundary before any field is trusted.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookEvent {
    Payment { data: WebhookData },
    SubscriptionPreapproval { data: WebhookData },
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub id: String,
}

impl WebhookEvent {
    pub fn data_id(&self) -> &str {
        match self {
            WebhookEvent::Payment { data } => &data.id,
            WebhookEvent::SubscriptionPreapproval { data } => &data.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "shhh-shared-secret";

    #[test]
    fn parses_signature_header() {
        let sig = SignatureHeader::parse("ts=1704908010,v1=abcdef0123456789").unwrap();
        assert_eq!(sig.ts, "1704908010");
        assert_eq!(sig.v1, "abcdef0123456789");
    }

    #[test]
    fn parses_signature_header_in_any_order_with_spaces() {
        let sig = SignatureHeader::parse("v1=deadbeef, ts=42").unwrap();
        assert_eq!(sig.ts, "42");
        assert_eq!(sig.v1, "deadbeef");
    }

    #[test]
    fn rejects_missing_components() {
        assert!(SignatureHeader::parse("ts=1704908010").is_none());
        assert!(SignatureHeader::parse("v1=deadbeef").is_none());
        assert!(SignatureHeader::parse("").is_none());
        assert!(SignatureHeader::parse("garbage").is_none());
    }

    #[test]
    fn manifest_layout_is_exact() {
        assert_eq!(
            build_manifest("12345", "req-1", "1704908010"),
            "id:12345;request-id:req-1;ts:1704908010;"
        );
    }

    #[test]
    fn round_trip_verification() {
        let manifest = build_manifest("12345", "req-1", "1704908010");
        let v1 = sign_manifest(SECRET, &manifest);
        assert!(verify_signature(SECRET, &manifest, &v1));
    }

    #[test]
    fn tampered_data_id_fails_verification() {
        let manifest = build_manifest("12345", "req-1", "1704908010");
        let v1 = sign_manifest(SECRET, &manifest);
        let forged = build_manifest("99999", "req-1", "1704908010");
        assert!(!verify_signature(SECRET, &forged, &v1));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let manifest = build_manifest("12345", "req-1", "1704908010");
        let v1 = sign_manifest("other-secret", &manifest);
        assert!(!verify_signature(SECRET, &manifest, &v1));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"abc", b"abc"));
    }

    #[test]
    fn payment_event_body_parses() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"type":"payment","data":{"id":"987"}}"#).unwrap();
        assert!(matches!(event, WebhookEvent::Payment { .. }));
        assert_eq!(event.data_id(), "987");
    }

    #[test]
    fn preapproval_event_body_parses() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"type":"subscription_preapproval","data":{"id":"pre-1"}}"#)
                .unwrap();
        assert!(matches!(event, WebhookEvent::SubscriptionPreapproval { .. }));
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        assert!(serde_json::from_str::<WebhookEvent>(
            r#"{"type":"plan_created","data":{"id":"x"}}"#
        )
        .is_err());
    }
}
