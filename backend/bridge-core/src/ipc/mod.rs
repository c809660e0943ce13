//! WebSocket transport for the bridge.
//!
//! The server side of the cross-process link. It provides:
//!
//! - WebSocket server (localhost-only)
//! - JSON protocol messages (see [`crate::protocol`])
//! - Authentication handshake (first message)
//! - One [`Viewport`](crate::transport::Viewport) per connection, destroyed
//!   when the connection ends
//!
//! # Security
//!
//! - Loopback-only binding, non-loopback peers rejected
//! - Authentication token required (generated on server start if not configured)

mod connection_state;
mod handle;
mod server;

pub use handle::IpcServerHandle;
pub use server::start_ipc_server;
