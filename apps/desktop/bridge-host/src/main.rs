use bridge_host::connection_info::ConnectionInfo;
use bridge_host::error::HostError;
use bridge_host::logger::{initialize as LoggerInitialize, level_filter};
use bridge_host::operations;
use bridge_host::settings::Settings;

use bridge_core::Bridge;
use bridge_core::ipc::start_ipc_server;

use std::fs::create_dir_all;
use std::process::ExitCode;

use log::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // The logger may not be up yet
            eprintln!("bridge-host failed: {e}");
            error!("bridge-host failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), HostError> {
    let settings = Settings::resolve()?;

    create_dir_all(&settings.log_dir).map_err(|e| HostError::Host {
        message: format!("Failed to create log directory: {e}"),
        location: common::ErrorLocation::caller(),
    })?;

    // Initialize logger FIRST
    LoggerInitialize(&settings.log_dir, level_filter(&settings.config.logging.level)?)?;

    info!("Bridge host starting");
    info!("Config directory: {}", settings.config_dir.display());
    info!("Log directory: {}", settings.log_dir.display());

    let bridge = Bridge::with_config(&settings.config.subscription);
    operations::register(&bridge)?;

    let handle = start_ipc_server(&settings.config.ipc, bridge).await?;
    info!("IPC server started on {}", handle.url());

    ConnectionInfo::from(&handle).write(&settings.config_dir)?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C, shutting down: {e}");
    }

    info!("Bridge host stopping");
    handle.shutdown().await;
    ConnectionInfo::remove(&settings.config_dir);
    Ok(())
}
