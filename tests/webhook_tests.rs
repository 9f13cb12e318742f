//! Tests for webhook verification and event handling
//!
//! Covers the signature scheme itself plus the full gateway path: replayed
//! deliveries, rejected signatures, malformed events, and unknown event
//! types.

use serde_json::json;
use warp::http::StatusCode;
use warp::test::request;

use onramp::api::webhook::{sign_payload, verify_signature, WebhookError};
use onramp::store::{IntentState, IntentStore};

#[path = "mod.rs"]
mod test_helpers;
use test_helpers::{
    build_harness, seed_confirmed_intent, signed_event_body, wait_for_state, DUMMY_INTENT_ID,
    DUMMY_WALLET_LOWER, TEST_WEBHOOK_SECRET,
};

fn succeeded_event(intent_id: &str) -> serde_json::Value {
    json!({
        "type": "payment_intent.succeeded",
        "data": { "object": { "id": intent_id } }
    })
}

fn failed_event(intent_id: &str, message: &str) -> serde_json::Value {
    json!({
        "type": "payment_intent.payment_failed",
        "data": { "object": {
            "id": intent_id,
            "last_payment_error": { "message": message }
        } }
    })
}

// ============================================================================
// SIGNATURE VERIFICATION TESTS
// ============================================================================

/// What is tested: a correctly signed payload verifies
/// Why: the happy path must pass before anything else matters
#[test]
fn test_valid_signature_verifies() {
    let body = br#"{"type":"payment_intent.succeeded"}"#;
    let header = sign_payload(TEST_WEBHOOK_SECRET, chrono::Utc::now().timestamp(), body);

    assert!(verify_signature(TEST_WEBHOOK_SECRET, &header, body, 300).is_ok());
}

/// What is tested: a signature from the wrong secret is rejected
/// Why: only the processor holding the shared secret may drive transitions
#[test]
fn test_wrong_secret_rejected() {
    let body = br#"{"type":"payment_intent.succeeded"}"#;
    let header = sign_payload("whsec_other", chrono::Utc::now().timestamp(), body);

    let result = verify_signature(TEST_WEBHOOK_SECRET, &header, body, 300);
    assert!(matches!(result, Err(WebhookError::BadSignature(_))));
}

/// What is tested: a tampered body no longer matches the signature
/// Why: the HMAC covers the raw body byte-for-byte
#[test]
fn test_tampered_body_rejected() {
    let body = br#"{"amount":1}"#;
    let header = sign_payload(TEST_WEBHOOK_SECRET, chrono::Utc::now().timestamp(), body);

    let result = verify_signature(TEST_WEBHOOK_SECRET, &header, br#"{"amount":9}"#, 300);
    assert!(matches!(result, Err(WebhookError::BadSignature(_))));
}

/// What is tested: a stale timestamp is rejected
/// Why: captured deliveries must not be replayable outside the tolerance
#[test]
fn test_stale_timestamp_rejected() {
    let body = br#"{}"#;
    let stale = chrono::Utc::now().timestamp() - 3_600;
    let header = sign_payload(TEST_WEBHOOK_SECRET, stale, body);

    let result = verify_signature(TEST_WEBHOOK_SECRET, &header, body, 300);
    assert!(matches!(result, Err(WebhookError::BadSignature(_))));
}

/// What is tested: garbage headers are rejected as bad signatures
/// Why: header parsing failures must not be mistaken for event problems
#[test]
fn test_malformed_headers_rejected() {
    let body = br#"{}"#;
    for header in ["", "v1=aaaa", "t=123", "t=abc,v1=ffff", "t=123,v1=zz", "nonsense"] {
        let result = verify_signature(TEST_WEBHOOK_SECRET, header, body, 300);
        assert!(
            matches!(result, Err(WebhookError::BadSignature(_))),
            "accepted header {:?}",
            header
        );
    }
}

/// What is tested: any one matching v1 entry suffices
/// Why: processors send multiple signatures during secret rotation
#[test]
fn test_rotation_header_with_one_valid_entry() {
    let body = br#"{}"#;
    let ts = chrono::Utc::now().timestamp();
    let good = sign_payload(TEST_WEBHOOK_SECRET, ts, body);
    let v1 = good.split("v1=").nth(1).unwrap();
    let header = format!("t={},v1={},v1={}", ts, "ab".repeat(32), v1);

    assert!(verify_signature(TEST_WEBHOOK_SECRET, &header, body, 300).is_ok());
}

// ============================================================================
// GATEWAY TESTS
// ============================================================================

/// What is tested: a signed success event confirms and disburses the intent
/// Why: this is the core confirmation-to-disbursement hand-off
#[tokio::test]
async fn test_succeeded_event_confirms_and_disburses() {
    let harness = build_harness();
    let routes = harness.server.test_routes();

    let record = onramp::store::PaymentIntentRecord::new(
        DUMMY_INTENT_ID,
        DUMMY_WALLET_LOWER,
        0.1,
        0.09,
        onramp::store::Network::Testnet,
    );
    harness.store.create(record).await.unwrap();

    let (body, header) = signed_event_body(&succeeded_event(DUMMY_INTENT_ID));
    let response = request()
        .method("POST")
        .path("/api/webhook/provider")
        .header("provider-signature", header)
        .body(&body)
        .reply(&routes)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let ack: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(ack["received"], json!(true));

    let record = wait_for_state(&harness.store, DUMMY_INTENT_ID, IntentState::Disbursed).await;
    assert!(record.tx_hash.is_some());
}

/// What is tested: N replayed success events produce one submission
/// Why: at-least-once delivery must never cause a double payout
#[tokio::test]
async fn test_replayed_succeeded_events_disburse_once() {
    let harness = build_harness();
    let routes = harness.server.test_routes();

    let record = onramp::store::PaymentIntentRecord::new(
        DUMMY_INTENT_ID,
        DUMMY_WALLET_LOWER,
        0.5,
        0.43,
        onramp::store::Network::Testnet,
    );
    harness.store.create(record).await.unwrap();

    for _ in 0..5 {
        let (body, header) = signed_event_body(&succeeded_event(DUMMY_INTENT_ID));
        let response = request()
            .method("POST")
            .path("/api/webhook/provider")
            .header("provider-signature", header)
            .body(&body)
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let record = wait_for_state(&harness.store, DUMMY_INTENT_ID, IntentState::Disbursed).await;
    // Give any residual queued duplicates a chance to run into the guard.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let submissions = harness.chain.submissions().await;
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].to, DUMMY_WALLET_LOWER);
    assert!(record.tx_hash.is_some());
}

/// What is tested: an invalid signature leaves state untouched
/// Why: authentication failures must reject before any mutation
#[tokio::test]
async fn test_bad_signature_mutates_nothing() {
    let harness = build_harness();
    let routes = harness.server.test_routes();

    let record = onramp::store::PaymentIntentRecord::new(
        DUMMY_INTENT_ID,
        DUMMY_WALLET_LOWER,
        0.1,
        0.09,
        onramp::store::Network::Testnet,
    );
    harness.store.create(record).await.unwrap();

    let body = succeeded_event(DUMMY_INTENT_ID).to_string();
    let header = sign_payload("whsec_wrong", chrono::Utc::now().timestamp(), body.as_bytes());

    let response = request()
        .method("POST")
        .path("/api/webhook/provider")
        .header("provider-signature", header)
        .body(&body)
        .reply(&routes)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let record = harness.store.get(DUMMY_INTENT_ID).await.unwrap().unwrap();
    assert_eq!(record.state, IntentState::Pending);
    assert!(harness.chain.submissions().await.is_empty());
}

/// What is tested: a missing signature header is rejected
/// Why: unauthenticated deliveries must not reach event parsing
#[tokio::test]
async fn test_missing_signature_header_rejected() {
    let harness = build_harness();
    let routes = harness.server.test_routes();

    let response = request()
        .method("POST")
        .path("/api/webhook/provider")
        .body(succeeded_event(DUMMY_INTENT_ID).to_string())
        .reply(&routes)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

/// What is tested: a signed but unparseable body is rejected as malformed
/// Why: bad-signature and bad-event are distinguished for diagnostics
#[tokio::test]
async fn test_malformed_event_rejected() {
    let harness = build_harness();
    let routes = harness.server.test_routes();

    let body = "not json at all";
    let header = sign_payload(
        TEST_WEBHOOK_SECRET,
        chrono::Utc::now().timestamp(),
        body.as_bytes(),
    );

    let response = request()
        .method("POST")
        .path("/api/webhook/provider")
        .header("provider-signature", header)
        .body(body)
        .reply(&routes)
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let parsed: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(parsed["error"], json!("Unreadable event payload"));
}

/// What is tested: unknown event types are acknowledged and ignored
/// Why: the processor sends many event types this service does not track
#[tokio::test]
async fn test_unknown_event_type_acknowledged() {
    let harness = build_harness();
    let routes = harness.server.test_routes();

    let (body, header) = signed_event_body(&json!({
        "type": "customer.created",
        "data": { "object": { "id": "cus_123" } }
    }));

    let response = request()
        .method("POST")
        .path("/api/webhook/provider")
        .header("provider-signature", header)
        .body(&body)
        .reply(&routes)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
}

/// What is tested: an event for an unknown intent id is acknowledged
/// Why: redelivery of an unappliable event would otherwise never stop
#[tokio::test]
async fn test_unknown_intent_acknowledged() {
    let harness = build_harness();
    let routes = harness.server.test_routes();

    let (body, header) = signed_event_body(&succeeded_event("pi_never_created"));

    let response = request()
        .method("POST")
        .path("/api/webhook/provider")
        .header("provider-signature", header)
        .body(&body)
        .reply(&routes)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(harness.chain.submissions().await.is_empty());
}

/// What is tested: a failed event moves the intent to Failed with a reason
/// Why: card failures terminate the intent without any chain activity
#[tokio::test]
async fn test_failed_event_fails_intent() {
    let harness = build_harness();
    let routes = harness.server.test_routes();

    let record = onramp::store::PaymentIntentRecord::new(
        DUMMY_INTENT_ID,
        DUMMY_WALLET_LOWER,
        0.1,
        0.09,
        onramp::store::Network::Testnet,
    );
    harness.store.create(record).await.unwrap();

    let (body, header) = signed_event_body(&failed_event(DUMMY_INTENT_ID, "card declined"));
    let response = request()
        .method("POST")
        .path("/api/webhook/provider")
        .header("provider-signature", header)
        .body(&body)
        .reply(&routes)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let record = harness.store.get(DUMMY_INTENT_ID).await.unwrap().unwrap();
    assert_eq!(record.state, IntentState::Failed);
    assert_eq!(record.failure_reason.as_deref(), Some("card declined"));
    assert!(record.tx_hash.is_none());
    assert!(harness.chain.submissions().await.is_empty());
}

/// What is tested: a replayed success event after disbursement changes nothing
/// Why: redelivery can arrive long after the transfer completed
#[tokio::test]
async fn test_late_replay_after_disbursement() {
    let harness = build_harness();
    let routes = harness.server.test_routes();

    seed_confirmed_intent(&harness.store, DUMMY_INTENT_ID, DUMMY_WALLET_LOWER, 0.1).await;
    harness.disburser.disburse(DUMMY_INTENT_ID);
    let disbursed = wait_for_state(&harness.store, DUMMY_INTENT_ID, IntentState::Disbursed).await;

    let (body, header) = signed_event_body(&succeeded_event(DUMMY_INTENT_ID));
    let response = request()
        .method("POST")
        .path("/api/webhook/provider")
        .header("provider-signature", header)
        .body(&body)
        .reply(&routes)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let record = harness.store.get(DUMMY_INTENT_ID).await.unwrap().unwrap();
    assert_eq!(record.state, IntentState::Disbursed);
    assert_eq!(record.tx_hash, disbursed.tx_hash);
    assert_eq!(harness.chain.submissions().await.len(), 1);
}
