use common::ErrorLocation;

use std::io::Error as IoError;
use std::panic::Location;
use std::path::PathBuf;

use thiserror::Error;

/// Failures loading, saving or checking the bridge's `config.json`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read bridge config {path}: {source} {location}")]
    Read {
        path: PathBuf,
        #[source]
        source: IoError,
        location: ErrorLocation,
    },

    #[error("Bridge config {path} is not valid JSON: {message} {location}")]
    Parse {
        path: PathBuf,
        message: String,
        location: ErrorLocation,
    },

    #[error("Could not write bridge config {path}: {source} {location}")]
    Write {
        path: PathBuf,
        #[source]
        source: IoError,
        location: ErrorLocation,
    },

    #[error("Could not encode bridge config: {message} {location}")]
    Encode {
        message: String,
        location: ErrorLocation,
    },

    #[error("Invalid bridge config: {message} {location}")]
    Invalid {
        message: String,
        location: ErrorLocation,
    },
}

impl ConfigError {
    #[track_caller]
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub(crate) fn write(path: PathBuf, source: IoError) -> Self {
        ConfigError::Write {
            path,
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
