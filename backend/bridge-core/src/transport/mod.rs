//! Transport primitives the dispatchers are written against.
//!
//! - [`viewport::Viewport`] - destination of pushed messages, source of teardown
//! - [`port::MessagePort`] - ordered duplex frame channel for sockets

pub mod port;
pub mod viewport;

pub use port::{MessagePort, PortFrame, SocketMessage};
pub use viewport::{ListenerId, Viewport, ViewportId};
