use pve_netbox_sync::{SyncConfig, SyncError};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "sync aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<bool, SyncError> {
    let config = SyncConfig::from_env()?;
    info!(
        pve = %config.pve.host,
        netbox = %config.netbox.url,
        parallelism = config.settings.max_parallelism,
        "starting sync"
    );

    let report = pve_netbox_sync::connect(&config)?.run().await?;
    for failure in &report.failures {
        error!(unit = %failure.unit, error = %failure.error, "unit failed");
    }
    Ok(report.is_success())
}
