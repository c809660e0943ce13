use common::ErrorLocation;

use std::panic::Location;

use thiserror::Error as ThisError;

/// Failures raised by the dispatch layer itself, as opposed to failures of
/// the registered operations.
#[derive(Debug, ThisError)]
pub enum DispatchError {
    #[error("Duplicate Registration Error: {message} {location}")]
    DuplicateRegistration {
        message: String,
        location: ErrorLocation,
    },

    #[error("Unknown Operation Error: {message} {location}")]
    UnknownOperation {
        message: String,
        location: ErrorLocation,
    },

    #[error("Invalid Input Error: {message} {location}")]
    InvalidInput {
        message: String,
        location: ErrorLocation,
    },

    #[error("Invalid Output Error: {message} {location}")]
    InvalidOutput {
        message: String,
        location: ErrorLocation,
    },
}

impl DispatchError {
    #[track_caller]
    pub(crate) fn unknown_operation(channel: &str) -> Self {
        DispatchError::UnknownOperation {
            message: format!("No handler registered for '{channel}'"),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub(crate) fn duplicate(channel: &str) -> Self {
        DispatchError::DuplicateRegistration {
            message: format!("A handler is already registered for '{channel}'"),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub(crate) fn invalid_input(channel: &str, error: serde_json::Error) -> Self {
        DispatchError::InvalidInput {
            message: format!("Failed to decode input for '{channel}': {error}"),
            location: ErrorLocation::from(Location::caller()),
        }
    }

    #[track_caller]
    pub(crate) fn invalid_output(channel: &str, error: serde_json::Error) -> Self {
        DispatchError::InvalidOutput {
            message: format!("Failed to encode output of '{channel}': {error}"),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
