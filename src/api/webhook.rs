//! Webhook Gateway
//!
//! Authenticates inbound processor events and maps them to intent
//! transitions. Verification runs before anything else touches state: a
//! bad signature mutates nothing. Processors deliver at-least-once, so the
//! whole path is safe to invoke arbitrarily many times for the same
//! logical event - correctness rests on the store's idempotent transition.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

/// Signature header carried on every processor delivery.
pub const SIGNATURE_HEADER: &str = "provider-signature";

type HmacSha256 = Hmac<Sha256>;

/// Webhook rejection classification, distinguished for diagnostics.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Header missing, unparseable, stale, or signature mismatch
    #[error("bad webhook signature: {0}")]
    BadSignature(String),
    /// Authentic delivery whose body is not a readable event
    #[error("malformed webhook event: {0}")]
    MalformedEvent(String),
}

// ============================================================================
// SIGNATURE VERIFICATION
// ============================================================================

/// Verifies a `t=<unix>,v1=<hex>` signature header against the raw body.
///
/// The signed payload is `"{t}.{body}"`; each `v1` candidate is compared in
/// constant time and one match suffices (the scheme allows multiple entries
/// during secret rotation). The timestamp must be within `tolerance_secs`
/// of now to blunt replay of captured deliveries.
///
/// # Arguments
///
/// * `secret` - Shared webhook signing secret
/// * `header` - Raw signature header value
/// * `body` - Raw request body, exactly as received
/// * `tolerance_secs` - Accepted clock skew in seconds
///
/// # Returns
///
/// * `Ok(())` - Delivery is authentic
/// * `Err(WebhookError::BadSignature)` - Verification failed
pub fn verify_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    tolerance_secs: u64,
) -> Result<(), WebhookError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse().map_err(|_| {
                    WebhookError::BadSignature("unparseable timestamp".to_string())
                })?);
            }
            Some(("v1", value)) => {
                let bytes = hex::decode(value).map_err(|_| {
                    WebhookError::BadSignature("signature is not hex".to_string())
                })?;
                candidates.push(bytes);
            }
            // Unknown scheme entries are ignored, same as unknown events.
            Some(_) => {}
            None => {
                return Err(WebhookError::BadSignature(
                    "malformed signature header".to_string(),
                ));
            }
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| WebhookError::BadSignature("missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(WebhookError::BadSignature("missing v1 signature".to_string()));
    }

    let now = chrono::Utc::now().timestamp();
    if (now - timestamp).unsigned_abs() > tolerance_secs {
        return Err(WebhookError::BadSignature("timestamp outside tolerance".to_string()));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WebhookError::BadSignature(format!("unusable secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);

    for candidate in &candidates {
        if mac.clone().verify_slice(candidate).is_ok() {
            return Ok(());
        }
    }

    Err(WebhookError::BadSignature("signature mismatch".to_string()))
}

/// Computes the `t=<unix>,v1=<hex>` header for a body, as the processor
/// would. Shared with tests and local tooling.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("t={},v1={}", timestamp, signature)
}

// ============================================================================
// EVENT STRUCTURES
// ============================================================================

/// Processor event envelope.
#[derive(Debug, Deserialize)]
pub struct ProviderEvent {
    /// Event type, e.g. `payment_intent.succeeded`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload
    pub data: EventData,
}

/// Payload wrapper around the affected payment object.
#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: EventObject,
}

/// The affected payment object; only the fields this service reads.
#[derive(Debug, Deserialize)]
pub struct EventObject {
    /// Processor payment reference = intent id
    pub id: String,
    /// Failure detail on `payment_intent.payment_failed` events
    #[serde(default)]
    pub last_payment_error: Option<PaymentErrorDetail>,
}

/// Processor-reported card failure detail.
#[derive(Debug, Deserialize)]
pub struct PaymentErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
}

/// Parses a verified delivery into an event.
///
/// # Arguments
///
/// * `body` - Raw request body
///
/// # Returns
///
/// * `Ok(ProviderEvent)` - Readable event
/// * `Err(WebhookError::MalformedEvent)` - Authentic but unparseable body
pub fn parse_event(body: &[u8]) -> Result<ProviderEvent, WebhookError> {
    serde_json::from_slice(body).map_err(|e| WebhookError::MalformedEvent(e.to_string()))
}
