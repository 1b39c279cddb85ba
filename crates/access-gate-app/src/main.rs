//! Launcher that resolves the launch display mode through the access gate.

use std::process::ExitCode;
use std::sync::Arc;

use access_gate_app::{
    AccessGate, AppError, DisplayRouter, PREFERENCES_FILE, app_version, config_from_env,
    data_dir_from_env, keyring_service_from_env,
};
use access_gate_control::{DeviceProfile, HttpControlTransport};
use access_gate_store::{JsonFileEndpointCache, KeyringCredentialStore};
use access_gate_ui::{DisplayMode, ViewState};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(error = %error, "access gate launcher failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AppError> {
    info!(version = app_version(), "starting access gate");

    let config = config_from_env()?;
    let data_dir = data_dir_from_env();
    let cache = Arc::new(JsonFileEndpointCache::new(data_dir.join(PREFERENCES_FILE)));
    let credentials = Arc::new(KeyringCredentialStore::new(keyring_service_from_env()));
    let transport = Arc::new(HttpControlTransport::new()?);
    let device = DeviceProfile::detect();
    info!(
        os = %device.os_descriptor(),
        lng = %device.language,
        model = %device.model,
        preferences = %cache.path().display(),
        "device profile resolved"
    );

    let gate = AccessGate::new(config, device, transport, credentials, cache);
    let mut router = DisplayRouter::mount(gate.subscribe());
    let shutdown = CancellationToken::new();
    let task = gate.spawn(shutdown.clone());

    log_view(router.view());
    loop {
        tokio::select! {
            view = router.next_view() => match view {
                Some(view) => {
                    log_view(&view);
                    if view.mode != DisplayMode::Loading {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received; cancelling verification");
                shutdown.cancel();
                break;
            }
        }
    }

    let report = task
        .await
        .map_err(|error| AppError::Runtime(format!("gate task failed: {error}")))?;
    info!(
        outcome = report.outcome.label(),
        attempts = report.attempts,
        path = ?report.path,
        "access gate finished"
    );
    Ok(())
}

fn log_view(view: &ViewState) {
    match &view.mode {
        DisplayMode::Loading => info!("display: loading indicator"),
        DisplayMode::Browser(url) => info!(url = %url, "display: embedded browser"),
        DisplayMode::NativeCatalog => info!("display: native catalog"),
    }
}
