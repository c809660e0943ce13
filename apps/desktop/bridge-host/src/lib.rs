// Library exports for testing
// The binary (main.rs) imports these as well

pub mod connection_info;
pub mod error;
pub mod logger;
pub mod operations;
pub mod settings;

#[cfg(test)]
mod tests;
