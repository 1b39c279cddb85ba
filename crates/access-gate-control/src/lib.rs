#![warn(missing_docs)]
//! # access-gate-control
//!
//! ## Purpose
//! Implements the client side of the control channel.
//!
//! ## Responsibilities
//! - Describe the device ([`DeviceProfile`]) reported to the control endpoint.
//! - Compose the signed query URL ([`build_request_url`]).
//! - Fetch the text response through an injectable [`ControlTransport`].
//!
//! ## Data flow
//! [`GateConfig`] + [`DeviceProfile`] -> [`ControlRequest`] ->
//! [`ControlTransport::fetch_text`] -> raw body for
//! `access_gate_core::ControlResponse::parse`.
//!
//! ## Ownership and lifetimes
//! Requests are rebuilt per attempt and own their URL. Transports are shared
//! behind `Arc<dyn ControlTransport>`.
//!
//! ## Error model
//! An unparseable base endpoint is [`ControlError::Configuration`] and is
//! never retried. Every transport failure is [`ControlError::Network`] and is
//! always retried by the gate.
//!
//! ## Security and privacy notes
//! Transport errors are stripped of the request URL so the shared secret does
//! not leak into logs.

use std::time::Duration;

use access_gate_core::{GateConfig, redact_control_url};
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Default request timeout for the HTTP transport.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Language reported when the platform exposes none.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Device attributes reported to the control endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProfile {
    /// Operating system name.
    pub os_name: String,
    /// Operating system version or kernel release.
    pub os_version: String,
    /// Primary language subtag, lowercased.
    pub language: String,
    /// Hardware model identifier.
    pub model: String,
    /// Region code, when the platform resolves one.
    pub region: Option<String>,
}

impl DeviceProfile {
    /// Reads the current platform's OS, locale, and hardware identifiers.
    ///
    /// `os_version` is the product version on macOS (`kern.osproductversion`,
    /// e.g. `14.4.1`). Other Unix platforms report the kernel release from
    /// `uname`, and non-Unix platforms report `unknown`.
    pub fn detect() -> Self {
        let locale = ["LC_ALL", "LC_MESSAGES", "LANG"]
            .into_iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.trim().is_empty())
            .unwrap_or_default();
        let (os_version, model) = platform_release_and_machine();

        Self {
            os_name: std::env::consts::OS.to_string(),
            os_version,
            language: language_subtag(&locale),
            model,
            region: region_subtag(&locale),
        }
    }

    /// OS descriptor sent as the `os` parameter.
    pub fn os_descriptor(&self) -> String {
        format!("{} {}", self.os_name, self.os_version)
    }
}

/// Extracts the primary language subtag from a locale or BCP 47 tag.
///
/// `en_US.UTF-8`, `en-US` and `EN` all yield `en`. Empty, `C` and `POSIX`
/// locales yield [`DEFAULT_LANGUAGE`].
pub fn language_subtag(tag: &str) -> String {
    let primary = strip_locale_suffixes(tag)
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if primary.is_empty() || primary == "c" || primary == "posix" {
        return DEFAULT_LANGUAGE.to_string();
    }
    primary
}

/// Extracts the region subtag (`US`, `419`) from a locale tag, if present.
pub fn region_subtag(tag: &str) -> Option<String> {
    strip_locale_suffixes(tag)
        .split(['-', '_'])
        .skip(1)
        .find(|subtag| {
            (subtag.len() == 2 && subtag.chars().all(|c| c.is_ascii_alphabetic()))
                || (subtag.len() == 3 && subtag.chars().all(|c| c.is_ascii_digit()))
        })
        .map(str::to_ascii_uppercase)
}

fn strip_locale_suffixes(tag: &str) -> &str {
    let tag = tag.split('.').next().unwrap_or_default();
    tag.split('@').next().unwrap_or_default()
}

#[cfg(unix)]
fn platform_release_and_machine() -> (String, String) {
    // Safety: `utsname` is plain old data; all-zero is a valid value.
    let mut name: libc::utsname = unsafe { std::mem::zeroed() };
    // Safety: `name` is a valid, writable `utsname` for the call duration.
    let status = unsafe { libc::uname(&mut name) };
    if status != 0 {
        return ("unknown".to_string(), std::env::consts::ARCH.to_string());
    }
    let release = product_version().unwrap_or_else(|| c_field(&name.release));
    (release, c_field(&name.machine))
}

#[cfg(target_os = "macos")]
fn product_version() -> Option<String> {
    let mut buf = [0 as libc::c_char; 64];
    let mut len = buf.len();
    // Safety: the name is NUL-terminated and `buf`/`len` describe a writable
    // buffer that outlives the call.
    let status = unsafe {
        libc::sysctlbyname(
            c"kern.osproductversion".as_ptr(),
            buf.as_mut_ptr().cast(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if status != 0 {
        return None;
    }
    let version = c_field(&buf[..len.min(buf.len())]);
    (!version.is_empty()).then_some(version)
}

#[cfg(all(unix, not(target_os = "macos")))]
fn product_version() -> Option<String> {
    None
}

#[cfg(unix)]
fn c_field(chars: &[libc::c_char]) -> String {
    let bytes: Vec<u8> = chars
        .iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(not(unix))]
fn platform_release_and_machine() -> (String, String) {
    ("unknown".to_string(), std::env::consts::ARCH.to_string())
}

/// One control-channel query, built fresh for every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    url: Url,
}

impl ControlRequest {
    /// Builds the request for `config` and `device`.
    ///
    /// # Errors
    /// Returns [`ControlError::Configuration`] when the base endpoint is not
    /// a valid URL.
    pub fn build(config: &GateConfig, device: &DeviceProfile) -> Result<Self, ControlError> {
        build_request_url(config, device).map(|url| Self { url })
    }

    /// Full request URL including query parameters.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Request URL rendered with the shared secret redacted.
    pub fn redacted(&self) -> String {
        redact_control_url(&self.url)
    }
}

/// Composes `<endpoint>?p=..&os=..&lng=..&devicemodel=..[&country=..]`.
///
/// Any query already present on the base endpoint is replaced.
///
/// # Errors
/// Returns [`ControlError::Configuration`] when the base endpoint fails to
/// parse.
pub fn build_request_url(config: &GateConfig, device: &DeviceProfile) -> Result<Url, ControlError> {
    let mut url = Url::parse(&config.control_endpoint).map_err(|error| {
        ControlError::Configuration(format!("invalid control endpoint: {error}"))
    })?;

    {
        let mut query = url.query_pairs_mut();
        query
            .clear()
            .append_pair("p", &config.shared_secret)
            .append_pair("os", &device.os_descriptor())
            .append_pair("lng", &device.language)
            .append_pair("devicemodel", &device.model);
        if let Some(region) = &device.region {
            query.append_pair("country", region);
        }
    }

    Ok(url)
}

/// Abstract transport used by the gate to reach the control endpoint.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Performs one GET and returns the decoded text body.
    ///
    /// # Errors
    /// Returns [`ControlError::Network`] for any transport failure.
    async fn fetch_text(&self, url: &Url) -> Result<String, ControlError>;
}

/// `reqwest`-backed control transport.
#[derive(Debug, Clone)]
pub struct HttpControlTransport {
    http: reqwest::Client,
}

impl HttpControlTransport {
    /// Creates a transport with [`DEFAULT_REQUEST_TIMEOUT`].
    ///
    /// # Errors
    /// Returns [`ControlError::Configuration`] when the HTTP client cannot be
    /// constructed (for example, no TLS backend).
    pub fn new() -> Result<Self, ControlError> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    /// Creates a transport with a custom per-request timeout.
    ///
    /// # Errors
    /// See [`HttpControlTransport::new`].
    pub fn with_timeout(timeout: Duration) -> Result<Self, ControlError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| {
                ControlError::Configuration(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self { http })
    }

    /// Wraps a preconfigured client (proxy, TLS roots, user agent).
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ControlTransport for HttpControlTransport {
    async fn fetch_text(&self, url: &Url) -> Result<String, ControlError> {
        debug!(endpoint = %redact_control_url(url), "fetching control response");

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(network_error)?
            .error_for_status()
            .map_err(network_error)?;

        let body = response.bytes().await.map_err(network_error)?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

fn network_error(error: reqwest::Error) -> ControlError {
    ControlError::Network(error.without_url().to_string())
}

/// Control-channel errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    /// Packaging/config defect; never retried.
    #[error("control configuration fault: {0}")]
    Configuration(String),
    /// Transport failure (timeout, DNS, TLS, non-2xx); always retried.
    #[error("control network failure: {0}")]
    Network(String),
}
