//! Connection details published for UI processes.
//!
//! The host writes `connection.json` next to its config once the IPC server is
//! listening; UI processes read it to find the port and the auth token.

use crate::error::HostError;

use bridge_core::ipc::IpcServerHandle;

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

const CONNECTION_FILE_NAME: &str = "connection.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    url: String,
    port: u16,
    auth_token: String,
}

impl ConnectionInfo {
    pub fn new(url: String, port: u16, auth_token: String) -> Self {
        Self {
            url,
            port,
            auth_token,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(CONNECTION_FILE_NAME)
    }

    /// Writes `connection.json` into `dir` via a temp file and rename.
    pub fn write(&self, dir: &Path) -> Result<(), HostError> {
        fs::create_dir_all(dir)
            .map_err(|e| HostError::host(format!("Failed to create {}: {e}", dir.display())))?;

        let path = Self::path(dir);
        let temp_path = dir.join(format!("{CONNECTION_FILE_NAME}.tmp"));
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HostError::host(format!("Failed to encode connection info: {e}")))?;

        fs::write(&temp_path, json)
            .map_err(|e| HostError::host(format!("Failed to write {}: {e}", temp_path.display())))?;
        fs::rename(&temp_path, &path)
            .map_err(|e| HostError::host(format!("Failed to write {}: {e}", path.display())))?;

        info!("Connection info written to {}", path.display());
        Ok(())
    }

    pub fn read(dir: &Path) -> Result<Self, HostError> {
        let path = Self::path(dir);
        let contents = fs::read_to_string(&path)
            .map_err(|e| HostError::host(format!("Failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&contents)
            .map_err(|e| HostError::host(format!("Invalid connection info in {}: {e}", path.display())))
    }

    /// Removes the file on shutdown so stale ports are not picked up.
    pub fn remove(dir: &Path) {
        let path = Self::path(dir);
        if let Err(e) = fs::remove_file(&path) {
            warn!("Failed to remove {}: {e}", path.display());
        }
    }
}

impl From<&IpcServerHandle> for ConnectionInfo {
    fn from(handle: &IpcServerHandle) -> Self {
        Self::new(handle.url(), handle.port(), handle.auth_token().to_string())
    }
}
