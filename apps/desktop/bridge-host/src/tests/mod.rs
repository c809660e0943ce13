mod connection_info;
mod error;
