//! Integration tests for control-channel verification outcomes.

mod common;

use std::sync::Arc;

use access_gate_app::{DecisionPath, FallbackReason, GateOutcome};
use access_gate_core::{GateConfig, GateState, TRUSTED_URL_KEY, VERIFICATION_TOKEN_KEY};
use access_gate_store::{CredentialStore, EndpointCache, MemoryCredentialStore, MemoryEndpointCache};
use common::{CODE, ScriptedTransport, fixture_config, fixture_gate};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn gate_slow_path_tests_valid_response_authorizes_and_persists() {
    let transport = Arc::new(ScriptedTransport::responding(&format!(
        "{CODE}#https://example.com/portal\n"
    )));
    let credentials = Arc::new(MemoryCredentialStore::new());
    let cache = Arc::new(MemoryEndpointCache::new());

    let gate = fixture_gate(fixture_config(), &transport, &credentials, &cache);
    let subscription = gate.subscribe();
    let report = gate.run(CancellationToken::new()).await;

    assert_eq!(report.attempts, 1);
    assert_eq!(report.path, DecisionPath::ControlChannel);
    let GateState::Authorized(endpoint) = subscription.current() else {
        panic!("gate should be authorized");
    };
    assert_eq!(endpoint.url.as_str(), "https://example.com/portal");
    assert_eq!(
        cache
            .load_url(TRUSTED_URL_KEY)
            .expect("cache read should work")
            .as_deref(),
        Some("https://example.com/portal")
    );
    assert_eq!(
        credentials
            .fetch(VERIFICATION_TOKEN_KEY)
            .expect("token should be stored"),
        CODE
    );
    assert_eq!(credentials.insert_count(), 1);

    let urls = transport.urls();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].query_pairs().any(|(key, value)| key == "country" && value == "US"));
}

#[tokio::test(start_paused = true)]
async fn gate_slow_path_tests_malformed_responses_fall_back_without_retry() {
    let bodies = [
        "no delimiter".to_string(),
        format!("{CODE}#https://a.test#extra"),
        format!("{CODE}#"),
        "XYZ#https://example.com/portal".to_string(),
    ];

    for body in bodies {
        let transport = Arc::new(ScriptedTransport::responding(&body));
        let credentials = Arc::new(MemoryCredentialStore::new());
        let cache = Arc::new(MemoryEndpointCache::new());

        let gate = fixture_gate(fixture_config(), &transport, &credentials, &cache);
        let subscription = gate.subscribe();
        let report = gate.run(CancellationToken::new()).await;

        assert_eq!(
            report.outcome,
            GateOutcome::Fallback(FallbackReason::InvalidResponse),
            "body {body:?} should be rejected"
        );
        assert_eq!(transport.call_count(), 1, "body {body:?} must not be retried");
        assert_eq!(subscription.current(), GateState::Fallback);
        assert!(credentials.is_empty());
        assert_eq!(
            cache.load_url(TRUSTED_URL_KEY).expect("cache read should work"),
            None
        );
    }
}

#[tokio::test(start_paused = true)]
async fn gate_slow_path_tests_invalid_endpoint_falls_back_with_zero_fetches() {
    let transport = Arc::new(ScriptedTransport::new(Vec::new()));
    let credentials = Arc::new(MemoryCredentialStore::new());
    let cache = Arc::new(MemoryEndpointCache::new());
    let config = GateConfig {
        control_endpoint: "definitely not a url".to_string(),
        ..fixture_config()
    };

    let gate = fixture_gate(config, &transport, &credentials, &cache);
    let subscription = gate.subscribe();
    let report = gate.run(CancellationToken::new()).await;

    assert_eq!(
        report.outcome,
        GateOutcome::Fallback(FallbackReason::ConfigurationFault)
    );
    assert_eq!(report.attempts, 0);
    assert_eq!(transport.call_count(), 0);
    assert_eq!(subscription.current(), GateState::Fallback);
}

#[tokio::test(start_paused = true)]
async fn gate_slow_path_tests_persistence_failures_do_not_block_authorization() {
    let transport = Arc::new(ScriptedTransport::responding(&format!(
        "{CODE}#https://example.com/portal"
    )));
    let credentials = Arc::new(MemoryCredentialStore::new());
    credentials.refuse_writes(true);
    let cache = Arc::new(MemoryEndpointCache::new());

    let report = fixture_gate(fixture_config(), &transport, &credentials, &cache)
        .run(CancellationToken::new())
        .await;
    assert!(matches!(report.outcome, GateOutcome::Authorized(_)));

    // URL saved, token missing: the next launch must verify over the network.
    assert!(
        cache
            .load_url(TRUSTED_URL_KEY)
            .expect("cache read should work")
            .is_some()
    );
    let next = Arc::new(ScriptedTransport::responding(&format!(
        "{CODE}#https://example.com/portal"
    )));
    credentials.refuse_writes(false);
    let report = fixture_gate(fixture_config(), &next, &credentials, &cache)
        .run(CancellationToken::new())
        .await;
    assert_eq!(report.path, DecisionPath::ControlChannel);
    assert_eq!(next.call_count(), 1);
}
