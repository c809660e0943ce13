pub mod client;
pub mod config;
pub mod dispatch;
pub mod ipc;

use std::error::Error as StdError;

/// Failure type returned by registered operations.
///
/// Anything convertible into a boxed error works with `?` inside a handler,
/// including plain strings.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;
