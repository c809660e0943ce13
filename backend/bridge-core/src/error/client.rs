use crate::envelope::RemoteError;

use common::ErrorLocation;

use std::panic::Location;

use thiserror::Error as ThisError;
use tokio_tungstenite::tungstenite::Error as WsError;

#[derive(Debug, ThisError)]
pub enum ClientError {
    #[error("Invalid URL Error: {message} {location}")]
    InvalidUrl {
        message: String,
        location: ErrorLocation,
    },

    #[error("Connect Error: {message} {location}")]
    Connect {
        message: String,
        location: ErrorLocation,
    },

    #[error("Auth Error: {message} {location}")]
    Auth {
        message: String,
        location: ErrorLocation,
    },

    #[error("Send Error: {message} {location}")]
    Send {
        message: String,
        location: ErrorLocation,
    },

    #[error("Closed Error: {message} {location}")]
    Closed {
        message: String,
        location: ErrorLocation,
    },

    #[error("Encode Error: {message} {location}")]
    Encode {
        message: String,
        location: ErrorLocation,
    },

    #[error("Decode Error: {message} {location}")]
    Decode {
        message: String,
        location: ErrorLocation,
    },

    #[error("Remote Error: {source} {location}")]
    Remote {
        #[source]
        source: RemoteError,
        location: ErrorLocation,
    },
}

impl ClientError {
    #[track_caller]
    pub(crate) fn closed(message: impl Into<String>) -> Self {
        ClientError::Closed {
            message: message.into(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<RemoteError> for ClientError {
    #[track_caller]
    fn from(source: RemoteError) -> Self {
        ClientError::Remote {
            source,
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<WsError> for ClientError {
    #[track_caller]
    fn from(error: WsError) -> Self {
        ClientError::Connect {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}

impl From<url::ParseError> for ClientError {
    #[track_caller]
    fn from(error: url::ParseError) -> Self {
        ClientError::InvalidUrl {
            message: error.to_string(),
            location: ErrorLocation::from(Location::caller()),
        }
    }
}
