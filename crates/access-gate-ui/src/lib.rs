#![warn(missing_docs)]
//! # access-gate-ui
//!
//! ## Purpose
//! Defines the view model the application shell renders at launch.
//!
//! ## Responsibilities
//! - Project [`GateState`] into one of loading, embedded browser, or native
//!   catalog.
//! - Track the embedded browser's loading flag so the same indicator covers
//!   both verification and page loads.
//!
//! ## Data flow
//! Gate state transitions -> [`ViewState::apply_gate_state`] -> shell swaps
//! views. Browser navigation callbacks -> [`ViewState::set_browser_loading`].
//!
//! ## Ownership and lifetimes
//! `ViewState` owns its redirect URL so it can be moved onto the UI thread.
//!
//! ## Error model
//! None. This is a pure projection; it neither retries nor validates.
//!
//! ## Security and privacy notes
//! The verification token is dropped during projection; views only see the
//! redirect URL.

use access_gate_core::GateState;
use url::Url;

/// What the shell should display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayMode {
    /// Verification in progress.
    Loading,
    /// Embedded browser pointed at the granted URL.
    Browser(Url),
    /// Native catalog entry point.
    NativeCatalog,
}

/// Aggregate view state for the launch screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    /// Current display mode.
    pub mode: DisplayMode,
    /// Whether the embedded browser reports an in-flight navigation.
    pub browser_loading: bool,
}

impl ViewState {
    /// Creates the initial loading view.
    pub fn new() -> Self {
        Self {
            mode: DisplayMode::Loading,
            browser_loading: false,
        }
    }

    /// Applies one gate transition.
    ///
    /// Entering `Browser` starts with the loading flag raised: the page begins
    /// loading as soon as the browser is mounted.
    pub fn apply_gate_state(&mut self, state: &GateState) {
        match state {
            GateState::Idle | GateState::Verifying => {
                self.mode = DisplayMode::Loading;
                self.browser_loading = false;
            }
            GateState::Authorized(endpoint) => {
                if self.browser_url() != Some(&endpoint.url) {
                    self.mode = DisplayMode::Browser(endpoint.url.clone());
                    self.browser_loading = true;
                }
            }
            GateState::Fallback => {
                self.mode = DisplayMode::NativeCatalog;
                self.browser_loading = false;
            }
        }
    }

    /// Records the embedded browser's loading flag. Ignored outside `Browser`.
    pub fn set_browser_loading(&mut self, loading: bool) {
        if matches!(self.mode, DisplayMode::Browser(_)) {
            self.browser_loading = loading;
        }
    }

    /// Returns `true` when the loading indicator overlays the view.
    pub fn shows_loading_indicator(&self) -> bool {
        match self.mode {
            DisplayMode::Loading => true,
            DisplayMode::Browser(_) => self.browser_loading,
            DisplayMode::NativeCatalog => false,
        }
    }

    /// Redirect URL when the browser is shown.
    pub fn browser_url(&self) -> Option<&Url> {
        match &self.mode {
            DisplayMode::Browser(url) => Some(url),
            _ => None,
        }
    }
}

impl Default for ViewState {
    fn default() -> Self {
        Self::new()
    }
}

/// Projects a single gate state into a fresh view state.
pub fn project_gate_state(state: &GateState) -> ViewState {
    let mut view = ViewState::new();
    view.apply_gate_state(state);
    view
}
