//! Per-connection state.
//!
//! Holds the expected auth token and the duplex ports opened over this connection.
//! Port ids are allocated by the client; each maps to the connection-side end
//! of a [`MessagePort`] pair whose other end was handed to a socket handler.

use crate::transport::MessagePort;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) struct ConnectionState {
    expected_token: String,
    ports: Arc<Mutex<HashMap<String, Arc<MessagePort>>>>,
}

impl ConnectionState {
    pub(crate) fn new(token: String) -> Self {
        Self {
            expected_token: token,
            ports: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn validate_token(&self, token: &str) -> bool {
        token == self.expected_token
    }

    /// Registers a port; returns `false` if the id is already in use.
    pub(crate) fn insert_port(&self, id: &str, port: Arc<MessagePort>) -> bool {
        let mut ports = lock(&self.ports);
        if ports.contains_key(id) {
            return false;
        }
        ports.insert(id.to_string(), port);
        true
    }

    pub(crate) fn port(&self, id: &str) -> Option<Arc<MessagePort>> {
        lock(&self.ports).get(id).cloned()
    }

    /// Handle used by forwarding tasks to unregister their port when it closes.
    pub(crate) fn port_table(&self) -> PortTable {
        PortTable {
            ports: Arc::clone(&self.ports),
        }
    }

    /// Closes every port still open on this connection.
    pub(crate) fn close_all_ports(&self) {
        let ports: Vec<_> = lock(&self.ports).drain().map(|(_, port)| port).collect();
        for port in ports {
            port.close();
        }
    }
}

#[derive(Clone)]
pub(crate) struct PortTable {
    ports: Arc<Mutex<HashMap<String, Arc<MessagePort>>>>,
}

impl PortTable {
    pub(crate) fn remove(&self, id: &str) {
        lock(&self.ports).remove(id);
    }
}

fn lock(
    ports: &Mutex<HashMap<String, Arc<MessagePort>>>,
) -> MutexGuard<'_, HashMap<String, Arc<MessagePort>>> {
    ports.lock().unwrap_or_else(PoisonError::into_inner)
}
