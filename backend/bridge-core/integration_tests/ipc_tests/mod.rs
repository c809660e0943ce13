mod client;
mod helpers;
mod ipc;
