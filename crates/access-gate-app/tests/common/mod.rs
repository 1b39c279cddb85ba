//! Shared fixtures for app integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use access_gate_app::AccessGate;
use access_gate_control::{ControlError, ControlTransport, DeviceProfile};
use access_gate_core::GateConfig;
use access_gate_store::{MemoryCredentialStore, MemoryEndpointCache};
use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Expected verification code used by test configs.
#[allow(dead_code)]
pub const CODE: &str = "GJDFHDFHFDJGSDAGKGHK";

/// Transport replaying scripted responses, then failing with network errors.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<String, ControlError>>>,
    calls: Mutex<Vec<Instant>>,
    urls: Mutex<Vec<Url>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    /// Replays `script` in order.
    pub fn new(script: Vec<Result<String, ControlError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Replays one successful body.
    pub fn responding(body: &str) -> Self {
        Self::new(vec![Ok(body.to_string())])
    }

    /// Always fails; cancels `token` once `calls` fetches have been made.
    pub fn offline_until(calls: usize, token: CancellationToken) -> Self {
        Self {
            cancel_after: Some((calls, token)),
            ..Self::default()
        }
    }

    /// Number of fetches performed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock should work").len()
    }

    /// Whole-second gaps between consecutive fetches.
    pub fn gaps_secs(&self) -> Vec<u64> {
        let calls = self.calls.lock().expect("calls lock should work");
        calls
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_secs())
            .collect()
    }

    /// URLs requested so far.
    pub fn urls(&self) -> Vec<Url> {
        self.urls.lock().expect("urls lock should work").clone()
    }
}

#[async_trait]
impl ControlTransport for ScriptedTransport {
    async fn fetch_text(&self, url: &Url) -> Result<String, ControlError> {
        let count = {
            let mut calls = self.calls.lock().expect("calls lock should work");
            calls.push(Instant::now());
            calls.len()
        };
        self.urls
            .lock()
            .expect("urls lock should work")
            .push(url.clone());

        if let Some((limit, token)) = &self.cancel_after
            && count >= *limit
        {
            token.cancel();
        }

        self.script
            .lock()
            .expect("script lock should work")
            .pop_front()
            .unwrap_or_else(|| Err(ControlError::Network("offline".to_string())))
    }
}

/// Fixed device profile for deterministic request URLs.
#[allow(dead_code)]
pub fn fixture_device() -> DeviceProfile {
    DeviceProfile {
        os_name: "iOS".to_string(),
        os_version: "17.4".to_string(),
        language: "en".to_string(),
        model: "iPhone15,2".to_string(),
        region: Some("US".to_string()),
    }
}

/// Test configuration pointing at an unreachable control endpoint.
#[allow(dead_code)]
pub fn fixture_config() -> GateConfig {
    GateConfig {
        control_endpoint: "https://control.example.test/server.php".to_string(),
        verification_code: CODE.to_string(),
        ..GateConfig::default()
    }
}

/// Builds a gate over shared fakes.
#[allow(dead_code)]
pub fn fixture_gate(
    config: GateConfig,
    transport: &Arc<ScriptedTransport>,
    credentials: &Arc<MemoryCredentialStore>,
    cache: &Arc<MemoryEndpointCache>,
) -> AccessGate {
    AccessGate::new(
        config,
        fixture_device(),
        transport.clone(),
        credentials.clone(),
        cache.clone(),
    )
}
