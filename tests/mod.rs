//! Test module organization
//!
//! This module re-exports test helpers for use in test files.

mod helpers;

#[allow(unused_imports)]
pub use helpers::{
    build_harness, build_harness_with_config, build_test_config, seed_confirmed_intent,
    signed_event_body, wait_for_state, FakeChainClient, FakeProcessorClient, Submission,
    TestHarness, DUMMY_INTENT_ID, DUMMY_WALLET_CHECKSUMMED, DUMMY_WALLET_LOWER,
    DUMMY_WALLET_SECOND, TEST_FUNDING_KEY, TEST_WEBHOOK_SECRET,
};
