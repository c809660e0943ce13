//! Shared building blocks for the bridge workspace.
//!
//! Every error enum in the workspace carries an [`ErrorLocation`] so that a
//! failure reported across the process boundary still points at the line
//! that produced it.

pub mod error;

pub use error::error_location::ErrorLocation;

#[cfg(test)]
mod tests;
