#![warn(missing_docs)]
//! # access-gate-app
//!
//! ## Purpose
//! Orchestrates the launch-time access gate: cached trust, control channel,
//! persistence, and the view the shell displays.
//!
//! ## Responsibilities
//! - Run the gate state machine (`idle -> verifying -> authorized | fallback`)
//!   exactly once per launch.
//! - Retry transport failures forever with capped exponential backoff.
//! - Publish every transition to subscribers through [`GateSubscription`].
//! - Drive [`DisplayRouter`] from those transitions.
//! - Load [`GateConfig`] overrides from a JSON file and the environment.
//!
//! ## Data flow
//! [`EndpointCache`] + [`CredentialStore`] -> fast path, or
//! [`ControlRequest`] -> [`ControlTransport`] -> [`ControlResponse`] ->
//! persistence -> [`GateState`] -> [`DisplayRouter`] -> [`ViewState`].
//!
//! ## Ownership and lifetimes
//! [`AccessGate::run`] consumes the gate, so one gate value yields one
//! verification task. The state channel is single-writer (the task) and
//! multi-reader (subscribers); every read clones a whole `GateState`.
//! Store backends are called on tokio's blocking pool, never on the gate task.
//!
//! ## Error model
//! Gate failures never reach the end user. They are classified with
//! [`classify_failure`] into backoff, fallback, or log-and-continue, and the
//! cause is reported to the launcher through [`GateReport`]. Startup errors
//! (bad config file, HTTP client setup) are [`AppError`] values.
//!
//! ## Security and privacy notes
//! The shared secret is redacted from logged URLs and the verification token
//! is logged only as a fingerprint.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use access_gate_control::{ControlError, ControlRequest, ControlTransport, DeviceProfile};
use access_gate_core::{
    ConfigError, ControlResponse, FailureClass, GateConfig, GateFailure, GateState, RetryPolicy,
    TrustedEndpoint, classify_failure, token_fingerprint,
};
use access_gate_store::{CredentialError, CredentialStore, EndpointCache};
use access_gate_ui::ViewState;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Build-time application version loaded from root `VERSION` file.
pub const APP_VERSION: &str = env!("ACCESS_GATE_VERSION");

/// Path of an optional JSON file with [`GateConfig`] fields.
pub const CONFIG_FILE_ENV: &str = "ACCESS_GATE_CONFIG_FILE";
/// Overrides [`GateConfig::control_endpoint`].
pub const CONTROL_ENDPOINT_ENV: &str = "ACCESS_GATE_CONTROL_ENDPOINT";
/// Overrides [`GateConfig::shared_secret`].
pub const SHARED_SECRET_ENV: &str = "ACCESS_GATE_SHARED_SECRET";
/// Overrides [`GateConfig::verification_code`].
pub const VERIFICATION_CODE_ENV: &str = "ACCESS_GATE_VERIFICATION_CODE";
/// Directory holding the plain preferences file.
pub const DATA_DIR_ENV: &str = "ACCESS_GATE_DATA_DIR";
/// Keyring service name for the credential store.
pub const KEYRING_SERVICE_ENV: &str = "ACCESS_GATE_KEYRING_SERVICE";

/// Default keyring service name.
pub const DEFAULT_KEYRING_SERVICE: &str = "access-gate";
/// File name of the plain preferences store inside the data directory.
pub const PREFERENCES_FILE: &str = "preferences.json";

/// Returns the app version sourced from root `VERSION`.
pub fn app_version() -> &'static str {
    APP_VERSION
}

/// Why the gate settled on the native catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Control endpoint could not be turned into a request.
    ConfigurationFault,
    /// Server answered with a well-formed but rejected response.
    InvalidResponse,
    /// A failure outside the fallback taxonomy reached the fallback branch.
    Unexpected,
}

/// Terminal result of one gate run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Access granted to the endpoint.
    Authorized(TrustedEndpoint),
    /// Native catalog is shown.
    Fallback(FallbackReason),
    /// Run was cancelled before reaching a terminal state.
    Cancelled,
}

impl GateOutcome {
    /// Short outcome name for structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Authorized(_) => "authorized",
            Self::Fallback(FallbackReason::ConfigurationFault) => "fallback_configuration",
            Self::Fallback(FallbackReason::InvalidResponse) => "fallback_invalid_response",
            Self::Fallback(FallbackReason::Unexpected) => "fallback_unexpected",
            Self::Cancelled => "cancelled",
        }
    }
}

/// How the gate reached its decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionPath {
    /// Cached trusted endpoint was accepted without network access.
    Cached,
    /// Control channel was consulted.
    ControlChannel,
}

/// Summary of one gate run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateReport {
    /// Terminal outcome.
    pub outcome: GateOutcome,
    /// Fetch attempts made; zero on the cached path.
    pub attempts: u32,
    /// Path that produced the outcome.
    pub path: DecisionPath,
}

/// Read-only view of the gate state channel.
///
/// Dropping the subscription unsubscribes.
#[derive(Debug, Clone)]
pub struct GateSubscription {
    receiver: watch::Receiver<GateState>,
}

impl GateSubscription {
    /// Returns a snapshot of the current state.
    pub fn current(&self) -> GateState {
        self.receiver.borrow().clone()
    }

    /// Waits for the next unseen state.
    ///
    /// Returns `None` once the gate task has finished and its final state has
    /// already been observed.
    pub async fn changed(&mut self) -> Option<GateState> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Waits until the state is terminal, or the gate stops without one.
    pub async fn wait_for_terminal(&mut self) -> GateState {
        loop {
            let state = self.receiver.borrow_and_update().clone();
            if state.is_terminal() {
                return state;
            }
            if self.receiver.changed().await.is_err() {
                return self.receiver.borrow().clone();
            }
        }
    }
}

/// Launch-time access gate state machine.
pub struct AccessGate {
    config: GateConfig,
    device: DeviceProfile,
    transport: Arc<dyn ControlTransport>,
    credentials: Arc<dyn CredentialStore>,
    cache: Arc<dyn EndpointCache>,
    retry: RetryPolicy,
    state: watch::Sender<GateState>,
}

impl AccessGate {
    /// Creates a gate in the `Idle` state.
    pub fn new(
        config: GateConfig,
        device: DeviceProfile,
        transport: Arc<dyn ControlTransport>,
        credentials: Arc<dyn CredentialStore>,
        cache: Arc<dyn EndpointCache>,
    ) -> Self {
        let (state, _) = watch::channel(GateState::Idle);
        Self {
            config,
            device,
            transport,
            credentials,
            cache,
            retry: RetryPolicy::default(),
            state,
        }
    }

    /// Replaces the transport backoff policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> GateSubscription {
        GateSubscription {
            receiver: self.state.subscribe(),
        }
    }

    /// Returns a snapshot of the current state.
    pub fn state(&self) -> GateState {
        self.state.borrow().clone()
    }

    /// Spawns [`AccessGate::run`] as the launch's verification task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<GateReport> {
        tokio::spawn(self.run(shutdown))
    }

    /// Runs the gate to a terminal state or until `shutdown` is cancelled.
    ///
    /// Transport failures are retried without limit; only cancellation ends
    /// an offline run. A cancelled run leaves the state at `Verifying`.
    pub async fn run(self, shutdown: CancellationToken) -> GateReport {
        if let Some(endpoint) = self.cached_endpoint().await {
            info!(
                url = %endpoint.url,
                token_fp = %token_fingerprint(&endpoint.token),
                "trusted endpoint restored from cache"
            );
            self.publish(GateState::Authorized(endpoint.clone()));
            return GateReport {
                outcome: GateOutcome::Authorized(endpoint),
                attempts: 0,
                path: DecisionPath::Cached,
            };
        }

        self.publish(GateState::Verifying);

        let mut attempt: u32 = 0;
        loop {
            let request = match ControlRequest::build(&self.config, &self.device) {
                Ok(request) => request,
                Err(error) => {
                    return self.fall_back(control_failure(error), attempt);
                }
            };

            attempt = attempt.saturating_add(1);
            debug!(attempt, endpoint = %request.redacted(), "querying control endpoint");

            let fetched = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return self.cancelled(attempt),
                fetched = self.transport.fetch_text(request.url()) => fetched,
            };

            let failure = match fetched {
                Ok(body) => match ControlResponse::parse(&body, &self.config.verification_code) {
                    Ok(endpoint) => return self.authorize(endpoint, attempt).await,
                    Err(error) => GateFailure::InvalidResponse(error),
                },
                Err(error) => control_failure(error),
            };

            match classify_failure(&failure) {
                FailureClass::Retriable => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %failure,
                        "control fetch failed; backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return self.cancelled(attempt),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                FailureClass::Fatal | FailureClass::Ignorable => {
                    return self.fall_back(failure, attempt);
                }
            }
        }
    }

    async fn cached_endpoint(&self) -> Option<TrustedEndpoint> {
        let cache = Arc::clone(&self.cache);
        let credentials = Arc::clone(&self.credentials);
        let config = self.config.clone();
        off_runtime(move || load_cached_endpoint(&*cache, &*credentials, &config))
            .await
            .flatten()
    }

    async fn authorize(&self, endpoint: TrustedEndpoint, attempts: u32) -> GateReport {
        self.persist(&endpoint).await;
        info!(
            attempts,
            url = %endpoint.url,
            token_fp = %token_fingerprint(&endpoint.token),
            "control channel authorized redirect"
        );
        self.publish(GateState::Authorized(endpoint.clone()));
        GateReport {
            outcome: GateOutcome::Authorized(endpoint),
            attempts,
            path: DecisionPath::ControlChannel,
        }
    }

    // Best-effort: a failed write only costs the fast path on the next launch.
    async fn persist(&self, endpoint: &TrustedEndpoint) {
        let cache = Arc::clone(&self.cache);
        let credentials = Arc::clone(&self.credentials);
        let config = self.config.clone();
        let endpoint = endpoint.clone();
        off_runtime(move || store_endpoint(&*cache, &*credentials, &config, &endpoint)).await;
    }

    fn fall_back(&self, failure: GateFailure, attempts: u32) -> GateReport {
        let reason = fallback_reason(&failure);
        info!(attempts, error = %failure, "falling back to native catalog");
        self.publish(GateState::Fallback);
        GateReport {
            outcome: GateOutcome::Fallback(reason),
            attempts,
            path: DecisionPath::ControlChannel,
        }
    }

    fn cancelled(&self, attempts: u32) -> GateReport {
        info!(attempts, "access gate cancelled before a decision");
        GateReport {
            outcome: GateOutcome::Cancelled,
            attempts,
            path: DecisionPath::ControlChannel,
        }
    }

    fn publish(&self, next: GateState) {
        let previous = self.state.send_replace(next);
        debug!(from = previous.name(), to = self.state.borrow().name(), "gate transition");
    }
}

// Store backends may block (keyring D-Bus round trips, file I/O).
async fn off_runtime<T, F>(work: F) -> Option<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(error = %error, "storage task did not complete");
            None
        }
    }
}

fn load_cached_endpoint(
    cache: &dyn EndpointCache,
    credentials: &dyn CredentialStore,
    config: &GateConfig,
) -> Option<TrustedEndpoint> {
    let raw = match cache.load_url(&config.trusted_url_key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(error) => {
            debug!(error = %error, "trusted url unreadable; treating as cache miss");
            return None;
        }
    };

    let Ok(url) = Url::parse(&raw) else {
        debug!("cached trusted url is malformed; treating as cache miss");
        return None;
    };

    let token = match credentials.fetch(&config.verification_token_key) {
        Ok(token) => token,
        Err(CredentialError::NotFound(_)) => return None,
        Err(error) => {
            debug!(error = %error, "verification token unreadable; treating as cache miss");
            return None;
        }
    };

    if token != config.verification_code {
        debug!(
            token_fp = %token_fingerprint(&token),
            "cached token does not match verification code"
        );
        return None;
    }

    Some(TrustedEndpoint { token, url })
}

fn store_endpoint(
    cache: &dyn EndpointCache,
    credentials: &dyn CredentialStore,
    config: &GateConfig,
    endpoint: &TrustedEndpoint,
) {
    if let Err(error) = cache.save_url(&config.trusted_url_key, endpoint.url.as_str()) {
        let failure = GateFailure::PersistenceFailure(error.to_string());
        warn!(error = %failure, "trusted url was not cached");
    }

    if let Err(error) = credentials.save(&config.verification_token_key, &endpoint.token) {
        let failure = GateFailure::PersistenceFailure(error.to_string());
        warn!(error = %failure, "verification token was not stored");
    }
}

fn fallback_reason(failure: &GateFailure) -> FallbackReason {
    match failure {
        GateFailure::ConfigurationFault(_) => FallbackReason::ConfigurationFault,
        GateFailure::InvalidResponse(_) => FallbackReason::InvalidResponse,
        GateFailure::TransportFailure(_) | GateFailure::PersistenceFailure(_) => {
            FallbackReason::Unexpected
        }
    }
}

fn control_failure(error: ControlError) -> GateFailure {
    match error {
        ControlError::Configuration(message) => GateFailure::ConfigurationFault(message),
        ControlError::Network(message) => GateFailure::TransportFailure(message),
    }
}

/// Projects gate transitions into the view the shell renders.
///
/// Subscribes once at mount; dropping the router unsubscribes.
#[derive(Debug)]
pub struct DisplayRouter {
    subscription: GateSubscription,
    view: ViewState,
}

impl DisplayRouter {
    /// Mounts the router on a gate subscription.
    pub fn mount(subscription: GateSubscription) -> Self {
        let mut view = ViewState::new();
        view.apply_gate_state(&subscription.current());
        Self { subscription, view }
    }

    /// Current view.
    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Waits for the next gate transition and returns the updated view.
    ///
    /// Returns `None` once the gate has stopped publishing.
    pub async fn next_view(&mut self) -> Option<ViewState> {
        let state = self.subscription.changed().await?;
        self.view.apply_gate_state(&state);
        Some(self.view.clone())
    }

    /// Forwards the embedded browser's loading flag.
    pub fn on_browser_loading(&mut self, loading: bool) {
        self.view.set_browser_loading(loading);
    }
}

/// Loads [`GateConfig`] from compiled defaults, an optional JSON file named by
/// [`CONFIG_FILE_ENV`], then individual environment overrides.
///
/// # Errors
/// Returns [`AppError::ConfigFile`] when the file cannot be read or decoded,
/// and [`AppError::Config`] when a required field is blank.
pub fn config_from_env() -> Result<GateConfig, AppError> {
    let mut config = match non_empty_env(CONFIG_FILE_ENV) {
        Some(path) => load_config_file(Path::new(&path))?,
        None => GateConfig::default(),
    };

    if let Some(endpoint) = non_empty_env(CONTROL_ENDPOINT_ENV) {
        config.control_endpoint = endpoint;
    }
    if let Some(secret) = non_empty_env(SHARED_SECRET_ENV) {
        config.shared_secret = secret;
    }
    if let Some(code) = non_empty_env(VERIFICATION_CODE_ENV) {
        config.verification_code = code;
    }

    config.validate()?;
    Ok(config)
}

/// Reads a JSON config file. Missing fields keep their compiled defaults.
///
/// # Errors
/// Returns [`AppError::ConfigFile`] on I/O or decode failure.
pub fn load_config_file(path: &Path) -> Result<GateConfig, AppError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|error| AppError::ConfigFile(format!("read {}: {error}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|error| AppError::ConfigFile(format!("decode {}: {error}", path.display())))
}

/// Resolves the preferences directory.
pub fn data_dir_from_env() -> PathBuf {
    match non_empty_env(DATA_DIR_ENV) {
        Some(dir) => PathBuf::from(dir),
        None => dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_KEYRING_SERVICE),
    }
}

/// Resolves the keyring service name.
pub fn keyring_service_from_env() -> String {
    non_empty_env(KEYRING_SERVICE_ENV).unwrap_or_else(|| DEFAULT_KEYRING_SERVICE.to_string())
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// App integration error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration failed validation.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// Configuration file unreadable or malformed.
    #[error("config file error: {0}")]
    ConfigFile(String),
    /// Control client setup failed.
    #[error("control error: {0}")]
    Control(#[from] ControlError),
    /// Verification task could not be joined.
    #[error("runtime error: {0}")]
    Runtime(String),
}
