//! Where the host keeps its files, and the configuration it runs with.
//!
//! Precedence, lowest first: built-in defaults, `config.json` in the config
//! directory, then `BRIDGE_*` environment variables (a `.env` file in the
//! working directory is loaded into the environment first).

use crate::error::HostError;

use bridge_core::config::BridgeConfig;

use common::ErrorLocation;

use std::env;
use std::path::PathBuf;

use log::debug;

const APP_DIR_NAME: &str = "ipc-bridge";
const LOG_DIR_NAME: &str = "logs";

pub const CONFIG_DIR_VAR: &str = "BRIDGE_CONFIG_DIR";
pub const IPC_PORT_VAR: &str = "BRIDGE_IPC_PORT";
pub const IPC_TOKEN_VAR: &str = "BRIDGE_IPC_TOKEN";
pub const LOG_LEVEL_VAR: &str = "BRIDGE_LOG_LEVEL";

#[derive(Debug, Clone)]
pub struct Settings {
    pub config_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config: BridgeConfig,
}

impl Settings {
    /// Resolves directories, loads `config.json` and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Host`] if no config directory can be determined, and
    /// [`HostError::Config`] if the file or an override is invalid.
    pub fn resolve() -> Result<Self, HostError> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }

        let config_dir = match env::var_os(CONFIG_DIR_VAR) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .map(|dir| dir.join(APP_DIR_NAME))
                .ok_or_else(|| HostError::host("Failed to determine config directory"))?,
        };
        let log_dir = dirs::data_local_dir()
            .map(|dir| dir.join(APP_DIR_NAME).join(LOG_DIR_NAME))
            .unwrap_or_else(|| config_dir.join(LOG_DIR_NAME));

        let config = load_config(&config_dir, |name| env::var(name).ok())?;

        Ok(Self {
            config_dir,
            log_dir,
            config,
        })
    }
}

/// Loads `config.json` from `config_dir` and applies overrides read through `lookup`.
///
/// # Errors
///
/// Returns [`HostError::Config`] if loading fails, an override does not parse,
/// or the result does not validate.
pub fn load_config(
    config_dir: &std::path::Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<BridgeConfig, HostError> {
    let mut config = BridgeConfig::load(config_dir)?;

    if let Some(port) = lookup(IPC_PORT_VAR) {
        config.ipc.port = port.trim().parse().map_err(|e| HostError::Config {
            message: format!("{IPC_PORT_VAR}={port} is not a port: {e}"),
            location: ErrorLocation::from(std::panic::Location::caller()),
        })?;
    }
    if let Some(token) = lookup(IPC_TOKEN_VAR) {
        config.ipc.auth_token = Some(token);
    }
    if let Some(level) = lookup(LOG_LEVEL_VAR) {
        config.logging.level = level;
    }

    config.validate()?;
    Ok(config)
}
