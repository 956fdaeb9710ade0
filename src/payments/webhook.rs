//! Stripe webhook verification.
//!
//! The `Stripe-Signature` header looks like `t=1700000000,v1=<hex>,v1=<hex>`.
//! Each `v1` entry is HMAC-SHA256 over `"{t}.{raw body}"` keyed with the
//! endpoint secret; one matching entry is enough.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Oldest signature timestamp accepted, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid payload")]
    InvalidPayload,

    #[error("Invalid signature")]
    InvalidSignature,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub object: Value,
}

impl WebhookEvent {
    /// Id of the object the event is about (the checkout session for
    /// `checkout.session.completed`).
    pub fn object_id(&self) -> Option<&str> {
        self.data.object.get("id").and_then(Value::as_str)
    }
}

/// Parses the event and checks its signature against `secret`.
///
/// `now` is the current unix time in seconds.
pub fn verify_event(
    payload: &[u8],
    signature_header: Option<&str>,
    secret: &str,
    now: i64,
) -> Result<WebhookEvent, WebhookError> {
    let event: WebhookEvent =
        serde_json::from_slice(payload).map_err(|_| WebhookError::InvalidPayload)?;

    let header = signature_header.ok_or(WebhookError::InvalidSignature)?;
    let (timestamp, signatures) = parse_signature_header(header)?;

    let age = now.checked_sub(timestamp).ok_or(WebhookError::InvalidSignature)?;
    if age > SIGNATURE_TOLERANCE_SECS {
        return Err(WebhookError::InvalidSignature);
    }

    let mac = signed_payload_mac(secret, timestamp, payload)?;
    let matched = signatures.iter().any(|candidate| {
        hex::decode(candidate).is_ok_and(|bytes| mac.clone().verify_slice(&bytes).is_ok())
    });

    if matched {
        Ok(event)
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

/// Hex signature Stripe would send for `payload` at `timestamp`.
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, WebhookError> {
    let mac = signed_payload_mac(secret, timestamp, payload)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn signed_payload_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

fn parse_signature_header(header: &str) -> Result<(i64, Vec<&str>), WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| WebhookError::InvalidSignature)?);
            }
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    match timestamp {
        Some(t) if !signatures.is_empty() => Ok((t, signatures)),
        _ => Err(WebhookError::InvalidSignature),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_700_000_000;
    const PAYLOAD: &[u8] =
        br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_test_42"}}}"#;

    fn header_for(timestamp: i64, payload: &[u8]) -> String {
        format!("t={},v1={}", timestamp, compute_signature(SECRET, timestamp, payload).unwrap())
    }

    #[test]
    fn accepts_a_correctly_signed_event() {
        let header = header_for(NOW, PAYLOAD);
        let event = verify_event(PAYLOAD, Some(&header), SECRET, NOW + 10).unwrap();

        assert_eq!(event.event_type, CHECKOUT_COMPLETED);
        assert_eq!(event.id.as_deref(), Some("evt_1"));
        assert_eq!(event.object_id(), Some("cs_test_42"));
    }

    #[test]
    fn any_matching_v1_entry_is_enough() {
        let good = compute_signature(SECRET, NOW, PAYLOAD).unwrap();
        let header = format!("t={},v1=deadbeef,v0=ignored,v1={}", NOW, good);

        assert!(verify_event(PAYLOAD, Some(&header), SECRET, NOW).is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let header = header_for(NOW, PAYLOAD);
        assert_eq!(
            verify_event(PAYLOAD, Some(&header), "whsec_other", NOW).unwrap_err(),
            WebhookError::InvalidSignature
        );
    }

    #[test]
    fn rejects_tampered_payload() {
        let header = header_for(NOW, PAYLOAD);
        let tampered = br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_evil"}}}"#;

        assert_eq!(
            verify_event(tampered, Some(&header), SECRET, NOW).unwrap_err(),
            WebhookError::InvalidSignature
        );
    }

    #[test]
    fn rejects_stale_timestamp() {
        let header = header_for(NOW, PAYLOAD);
        assert_eq!(
            verify_event(PAYLOAD, Some(&header), SECRET, NOW + SIGNATURE_TOLERANCE_SECS + 1).unwrap_err(),
            WebhookError::InvalidSignature
        );
    }

    #[test]
    fn rejects_missing_or_garbled_header() {
        for header in [None, Some(""), Some("t=abc,v1=00"), Some("v1=00"), Some("t=1700000000")] {
            assert_eq!(
                verify_event(PAYLOAD, header, SECRET, NOW).unwrap_err(),
                WebhookError::InvalidSignature,
                "header {:?}",
                header
            );
        }
    }

    #[test]
    fn non_json_body_is_invalid_payload() {
        let body = b"not json";
        let header = header_for(NOW, body);
        assert_eq!(
            verify_event(body, Some(&header), SECRET, NOW).unwrap_err(),
            WebhookError::InvalidPayload
        );
    }

    #[test]
    fn extreme_timestamps_are_rejected_without_overflow() {
        for timestamp in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1=00", timestamp);
            assert_eq!(
                verify_event(PAYLOAD, Some(&header), SECRET, NOW).unwrap_err(),
                WebhookError::InvalidSignature,
                "t={}",
                timestamp
            );
        }
    }

    #[test]
    fn far_future_timestamp_still_needs_a_valid_signature() {
        let future = NOW + 10 * 365 * 24 * 60 * 60;
        let forged = format!("t={},v1={}", future, "ab".repeat(32));
        assert_eq!(
            verify_event(PAYLOAD, Some(&forged), SECRET, NOW).unwrap_err(),
            WebhookError::InvalidSignature
        );
    }
}
