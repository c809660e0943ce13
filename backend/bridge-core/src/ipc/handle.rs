//! IPC server handle type.

use std::net::SocketAddr;

use log::info;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a running IPC WebSocket server.
///
/// Returned by [`start_ipc_server`](crate::ipc::start_ipc_server).
///
/// # Lifecycle
///
/// [`shutdown`](IpcServerHandle::shutdown) stops accepting connections and
/// closes every live connection, which tears down all subscriptions and
/// sockets bound to them. Dropping the handle has the same effect without
/// waiting for the accept loop.
pub struct IpcServerHandle {
    pub(crate) local_addr: SocketAddr,
    pub(crate) auth_token: String,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) accept_task: JoinHandle<()>,
}

impl IpcServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// `ws://` URL clients connect to.
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Stops the server and waits for the accept loop to exit.
    pub async fn shutdown(self) {
        info!("Shutting down IPC server on {}", self.local_addr);
        self.shutdown_tx.send_replace(true);
        let _ = self.accept_task.await;
    }
}
