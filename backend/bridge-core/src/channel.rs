//! Channel naming.
//!
//! Every registered operation is reachable through a registration channel
//! (`kind prefix + operation name`). Subscriptions and sockets additionally
//! get one identifier per invocation, made unique by a process-wide counter,
//! so concurrent invocations of the same operation never share a channel.

use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::atomic::{AtomicU64, Ordering};

use const_format::concatcp;
use serde::{Deserialize, Serialize};

const CHANNEL_ROOT: &str = "ipc:";

pub const UNARY_PREFIX: &str = concatcp!(CHANNEL_ROOT, "handle:");
pub const SUBSCRIPTION_PREFIX: &str = concatcp!(CHANNEL_ROOT, "subscribe:");
pub const SOCKET_PREFIX: &str = concatcp!(CHANNEL_ROOT, "socket:");

const START_SUFFIX: &str = ":start";
const STOP_SUFFIX: &str = ":stop";

/// Invocation counter shared by every subscription and socket in the process.
static NEXT_INVOCATION: AtomicU64 = AtomicU64::new(0);

/// The three interaction patterns the bridge multiplexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Unary,
    Subscription,
    Socket,
}

impl ChannelKind {
    pub const fn prefix(self) -> &'static str {
        match self {
            ChannelKind::Unary => UNARY_PREFIX,
            ChannelKind::Subscription => SUBSCRIPTION_PREFIX,
            ChannelKind::Socket => SOCKET_PREFIX,
        }
    }
}

/// Registration channel for `operation` under `kind`. Pure and deterministic.
pub fn channel_for(kind: ChannelKind, operation: &str) -> String {
    format!("{}{operation}", kind.prefix())
}

/// Identifier of a single subscription or socket invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Allocates the identifier for a fresh invocation of `operation`.
    pub fn next(kind: ChannelKind, operation: &str) -> Self {
        let sequence = next_sequence();
        ChannelId(format!("{}{operation}:{sequence}", kind.prefix()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channel on which the subscriber announces it is ready to receive.
    pub fn start_signal(&self) -> String {
        format!("{}{START_SUFFIX}", self.0)
    }

    /// Channel on which the subscriber asks the producer to stop.
    pub fn stop_signal(&self) -> String {
        format!("{}{STOP_SUFFIX}", self.0)
    }
}

impl Display for ChannelId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FormatResult {
        formatter.write_str(&self.0)
    }
}

impl From<String> for ChannelId {
    fn from(value: String) -> Self {
        ChannelId(value)
    }
}

/// Takes the next value of the process-wide invocation counter.
pub(crate) fn next_sequence() -> u64 {
    NEXT_INVOCATION.fetch_add(1, Ordering::Relaxed)
}
