#![warn(missing_docs)]
//! # access-gate-core
//!
//! ## Purpose
//! Defines the pure data model shared across the `access-gate` workspace.
//!
//! ## Responsibilities
//! - Represent the gate lifecycle ([`GateState`]) and validated endpoints
//!   ([`TrustedEndpoint`]).
//! - Parse the control-channel response format `<code>#<url>`.
//! - Carry immutable build-time configuration ([`GateConfig`]).
//! - Compute capped exponential backoff ([`RetryPolicy`]) and classify gate
//!   failures into retry decisions.
//! - Provide log-safe renderings of control URLs and tokens.
//!
//! ## Data flow
//! Control client fetches raw text -> [`ControlResponse::parse`] yields a
//! [`TrustedEndpoint`] -> gate publishes [`GateState::Authorized`].
//!
//! ## Ownership and lifetimes
//! All values own their strings and URLs so state snapshots can cross task
//! boundaries without borrowing from network buffers.
//!
//! ## Error model
//! Semantic response failures are [`ResponseError`] values. They are never
//! transient and callers must not retry them.
//!
//! ## Security and privacy notes
//! The shared secret and verification token never appear in `Display` output
//! of this crate's types. Use [`redact_control_url`] and [`token_fingerprint`]
//! when logging.
//!
//! ## Example
//! ```rust
//! use access_gate_core::{ControlResponse, GateState};
//!
//! let endpoint = ControlResponse::parse("CODE#https://example.com/portal", "CODE")
//!     .expect("response should validate");
//! let state = GateState::Authorized(endpoint);
//! assert!(state.is_terminal());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Shared-secret value sent as the `p` query parameter.
pub const DEFAULT_SHARED_SECRET: &str = "Bs2675kDjkb5Ga";

/// Base control endpoint queried on the slow path.
pub const DEFAULT_CONTROL_ENDPOINT: &str =
    "https://gtappinfo.site/ios-epicvault-manageabout/server.php";

/// Verification code the server must echo back.
pub const DEFAULT_VERIFICATION_CODE: &str = "GJDFHDFHFDJGSDAGKGHK";

/// Plain local-store key holding the last trusted redirect URL.
pub const TRUSTED_URL_KEY: &str = "uniqueStoredTrustedURL";

/// Confidential-store account name holding the verification token.
pub const VERIFICATION_TOKEN_KEY: &str = "uniqueStoredVerificationToken";

/// Delimiter between verification code and redirect URL in responses.
pub const RESPONSE_DELIMITER: char = '#';

/// Immutable gate configuration injected at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Value of the `p` query parameter.
    pub shared_secret: String,
    /// Base control endpoint. Kept unparsed so that a bad value surfaces as a
    /// configuration fault at gate start.
    pub control_endpoint: String,
    /// Expected verification code in server responses and cached tokens.
    pub verification_code: String,
    /// Plain-store key for the trusted URL.
    pub trusted_url_key: String,
    /// Credential-store key for the verification token.
    pub verification_token_key: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            shared_secret: DEFAULT_SHARED_SECRET.to_string(),
            control_endpoint: DEFAULT_CONTROL_ENDPOINT.to_string(),
            verification_code: DEFAULT_VERIFICATION_CODE.to_string(),
            trusted_url_key: TRUSTED_URL_KEY.to_string(),
            verification_token_key: VERIFICATION_TOKEN_KEY.to_string(),
        }
    }
}

impl GateConfig {
    /// Validates fields that must never be blank.
    ///
    /// The control endpoint is deliberately not parsed here; an unparseable
    /// endpoint is a gate-time fallback, not a startup error.
    ///
    /// # Errors
    /// Returns [`ConfigError::Blank`] naming the first empty field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("verification_code", &self.verification_code),
            ("trusted_url_key", &self.trusted_url_key),
            ("verification_token_key", &self.verification_token_key),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(ConfigError::Blank(name));
            }
        }
        Ok(())
    }
}

/// A validated `(token, url)` pair allowing the fast path on later launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedEndpoint {
    /// Verification token, equal to the configured verification code.
    pub token: String,
    /// Redirect URL shown in the embedded browser.
    pub url: Url,
}

/// Access gate lifecycle for one launch session.
///
/// `Authorized` carries both fields in one owned value, so a reader either
/// sees the complete pair or a different variant.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GateState {
    /// Gate has not started yet.
    #[default]
    Idle,
    /// Control channel verification is in progress.
    Verifying,
    /// Access granted; display the embedded browser.
    Authorized(TrustedEndpoint),
    /// Access declined or impossible; display the native catalog.
    Fallback,
}

impl GateState {
    /// Returns `true` for `Authorized` and `Fallback`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Authorized(_) | Self::Fallback)
    }

    /// Returns the granted endpoint when authorized.
    pub fn endpoint(&self) -> Option<&TrustedEndpoint> {
        match self {
            Self::Authorized(endpoint) => Some(endpoint),
            _ => None,
        }
    }

    /// Short state name for structured logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Verifying => "verifying",
            Self::Authorized(_) => "authorized",
            Self::Fallback => "fallback",
        }
    }
}

/// Control-channel response parser.
#[derive(Debug, Clone, Copy)]
pub struct ControlResponse;

impl ControlResponse {
    /// Validates raw response text of the form `<code>#<url>`.
    ///
    /// Surrounding whitespace and newlines are trimmed before splitting.
    ///
    /// # Errors
    /// - [`ResponseError::PartCount`] when the text does not split into
    ///   exactly two parts.
    /// - [`ResponseError::CodeMismatch`] when part 0 differs from
    ///   `expected_code`.
    /// - [`ResponseError::InvalidUrl`] when part 1 is not an absolute URL.
    pub fn parse(raw: &str, expected_code: &str) -> Result<TrustedEndpoint, ResponseError> {
        let parts: Vec<&str> = raw.trim().split(RESPONSE_DELIMITER).collect();
        let [code, url] = parts.as_slice() else {
            return Err(ResponseError::PartCount(parts.len()));
        };

        if *code != expected_code {
            return Err(ResponseError::CodeMismatch);
        }

        let url = Url::parse(url).map_err(|error| ResponseError::InvalidUrl(error.to_string()))?;

        Ok(TrustedEndpoint {
            token: (*code).to_string(),
            url,
        })
    }
}

/// Capped exponential backoff for transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Largest exponent applied to the 2-second base.
    pub max_exponent: u32,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Returns the delay to wait after failed `attempt` (1-based).
    ///
    /// Computes `min(2^min(attempt, max_exponent), max_delay)` seconds.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(self.max_exponent).min(63);
        let secs = 1_u64.checked_shl(exponent).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_exponent: 6,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Failure taxonomy of the access gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateFailure {
    /// Base endpoint failed to parse.
    #[error("configuration fault: {0}")]
    ConfigurationFault(String),
    /// Network-layer error during fetch.
    #[error("transport failure: {0}")]
    TransportFailure(String),
    /// Well-formed text that failed semantic validation.
    #[error("invalid control response: {0}")]
    InvalidResponse(#[from] ResponseError),
    /// Cache or credential read/write failure.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

/// How the gate reacts to one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Back off and retry.
    Retriable,
    /// Stop and fall back to the native catalog.
    Fatal,
    /// Log and continue.
    Ignorable,
}

/// Classifies a gate failure into its retry decision.
pub fn classify_failure(failure: &GateFailure) -> FailureClass {
    match failure {
        GateFailure::TransportFailure(_) => FailureClass::Retriable,
        GateFailure::ConfigurationFault(_) | GateFailure::InvalidResponse(_) => {
            FailureClass::Fatal
        }
        GateFailure::PersistenceFailure(_) => FailureClass::Ignorable,
    }
}

/// Renders a control URL with the shared-secret parameter redacted.
pub fn redact_control_url(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "p" {
                "<redacted>".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();

    if pairs.is_empty() {
        return redacted.to_string();
    }

    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

/// Returns a short SHA-256 fingerprint used to correlate tokens in logs.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..4])
}

/// Response validation failures. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    /// Body did not split into exactly `code#url`.
    #[error("expected 2 '#'-separated parts, found {0}")]
    PartCount(usize),
    /// Verification code did not match.
    #[error("verification code mismatch")]
    CodeMismatch,
    /// Redirect part was not an absolute URL.
    #[error("redirect url is malformed: {0}")]
    InvalidUrl(String),
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required field is empty.
    #[error("config field `{0}` must be non-empty")]
    Blank(&'static str),
}
