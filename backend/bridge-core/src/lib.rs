pub mod channel;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod ipc;
pub mod protocol;
pub mod transport;

#[cfg(test)]
mod tests;

pub use client::{BridgeClient, ClientSocket, Subscription};
pub use dispatch::{Bridge, EventSink, SocketHooks, StreamProducer};
pub use envelope::{ErrorInfo, RemoteError, SubscriptionEvent, UnaryEnvelope};

pub const BRIDGE_SERVER_HOSTNAME: &str = "127.0.0.1";
pub const BRIDGE_DEFAULT_PORT: u16 = 19876;
pub const BRIDGE_SERVER_BASE_URL: &str = const_format::concatcp!("ws://", BRIDGE_SERVER_HOSTNAME);
