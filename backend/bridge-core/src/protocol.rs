//! Wire messages exchanged between a UI process and the bridge.
//!
//! Messages are JSON objects tagged by `type`, carried as WebSocket text
//! frames. Channel-level semantics (envelopes, events, frames) are defined in
//! [`crate::envelope`] and [`crate::transport::port`]; this module only
//! frames them for the transport.

use crate::channel::ChannelId;
use crate::envelope::{SubscriptionEvent, UnaryEnvelope};
use crate::transport::port::PortFrame;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// UI process → bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Must be the first message on a connection.
    AuthHandshake { token: String },

    /// Unary invoke on a registration channel.
    Call {
        request_id: u64,
        channel: String,
        #[serde(default)]
        input: Value,
    },

    /// Opens a subscription; answered with [`ServerMessage::Subscribed`].
    Subscribe {
        request_id: u64,
        channel: String,
        #[serde(default)]
        input: Value,
    },

    /// Fire-and-forget signal such as `<channel id>:start` or `<channel id>:stop`.
    Signal { channel: String },

    /// Opens a socket bound to the caller-allocated port identifier.
    OpenSocket {
        channel: String,
        port: String,
        #[serde(default)]
        input: Value,
    },

    PortFrame { port: String, frame: PortFrame },

    /// The caller closed its end of a port.
    PortClose { port: String },

    /// The caller's viewport navigated away; everything bound to it is torn down.
    Navigated,
}

/// Bridge → UI process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    AuthResult {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    Reply {
        request_id: u64,
        envelope: UnaryEnvelope,
    },

    Subscribed {
        request_id: u64,
        channel: ChannelId,
    },

    /// `event: null` is the terminal sentinel.
    Event {
        channel: ChannelId,
        event: Option<SubscriptionEvent>,
    },

    PortFrame { port: String, frame: PortFrame },

    PortClosed { port: String },

    /// A message the bridge could not act on; the connection stays open.
    ProtocolError { message: String },
}
