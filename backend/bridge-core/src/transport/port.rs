//! Entangled message ports.
//!
//! A socket invocation talks to its caller through a pair of ports: whatever
//! one end posts, the other end receives, in order. Closing either end closes
//! both, and the close is observable exactly once per end.

use crate::envelope::ErrorInfo;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::{Mutex, watch};

/// Application payload carried by a socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SocketMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl From<String> for SocketMessage {
    fn from(value: String) -> Self {
        SocketMessage::Text(value)
    }
}

impl From<&str> for SocketMessage {
    fn from(value: &str) -> Self {
        SocketMessage::Text(value.to_string())
    }
}

impl From<Vec<u8>> for SocketMessage {
    fn from(value: Vec<u8>) -> Self {
        SocketMessage::Binary(value)
    }
}

/// One frame on a port. Control frames and data frames are distinct variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum PortFrame {
    Data(SocketMessage),
    /// The sender is about to close the port.
    Closing,
    /// Socket setup completed; application frames may follow.
    Ready,
    /// Socket setup failed; the port is closed right after.
    ReadyError(ErrorInfo),
}

struct PortShared {
    closed: AtomicBool,
    notify: watch::Sender<bool>,
}

/// One end of an entangled pair.
pub struct MessagePort {
    outgoing: UnboundedSender<PortFrame>,
    incoming: Mutex<UnboundedReceiver<PortFrame>>,
    shared: Arc<PortShared>,
}

impl MessagePort {
    pub fn pair() -> (MessagePort, MessagePort) {
        let (left_tx, right_rx) = unbounded_channel();
        let (right_tx, left_rx) = unbounded_channel();
        let (notify, _) = watch::channel(false);
        let shared = Arc::new(PortShared {
            closed: AtomicBool::new(false),
            notify,
        });

        let left = MessagePort {
            outgoing: left_tx,
            incoming: Mutex::new(left_rx),
            shared: Arc::clone(&shared),
        };
        let right = MessagePort {
            outgoing: right_tx,
            incoming: Mutex::new(right_rx),
            shared,
        };
        (left, right)
    }

    /// Posts a frame to the other end. Returns `false` once the pair is closed.
    pub fn post(&self, frame: PortFrame) -> bool {
        if self.is_closed() {
            return false;
        }
        self.outgoing.send(frame).is_ok()
    }

    /// Receives the next frame from the other end.
    ///
    /// Frames posted before the close are still delivered; `None` means the
    /// pair is closed and drained.
    pub async fn recv(&self) -> Option<PortFrame> {
        let mut incoming = self.incoming.lock().await;
        if let Ok(frame) = incoming.try_recv() {
            return Some(frame);
        }
        if self.is_closed() {
            return None;
        }

        tokio::select! {
            biased;
            frame = incoming.recv() => frame,
            _ = self.closed() => incoming.try_recv().ok(),
        }
    }

    /// Closes both ends. Returns `true` only for the call that closed the pair.
    pub fn close(&self) -> bool {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shared.notify.send_replace(true);
        true
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Resolves once the pair is closed, by either end.
    pub async fn closed(&self) {
        let mut receiver = self.shared.notify.subscribe();
        let _ = receiver.wait_for(|closed| *closed).await;
    }
}
