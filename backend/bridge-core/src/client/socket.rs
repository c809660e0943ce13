use super::{ClientInner, PortEvent};
use crate::error::client::ClientError;
use crate::protocol::ClientMessage;
use crate::transport::{PortFrame, SocketMessage};

use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc::UnboundedReceiver;

/// Client end of a duplex socket, returned once setup completed.
///
/// Dropping the socket closes it.
pub struct ClientSocket {
    port: String,
    frames: UnboundedReceiver<PortEvent>,
    client: Arc<ClientInner>,
    closed: bool,
}

impl ClientSocket {
    pub(crate) fn new(port: String, frames: UnboundedReceiver<PortEvent>, client: Arc<ClientInner>) -> Self {
        Self {
            port,
            frames,
            client,
            closed: false,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// # Errors
    ///
    /// Returns [`ClientError::Closed`] once the socket is closed.
    pub fn send(&self, message: impl Into<SocketMessage>) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::closed(format!("Socket {} is closed", self.port)));
        }
        self.client.send(ClientMessage::PortFrame {
            port: self.port.clone(),
            frame: PortFrame::Data(message.into()),
        })
    }

    /// Next message from the handler; `None` once the socket closed.
    pub async fn recv(&mut self) -> Option<SocketMessage> {
        while !self.closed {
            match self.frames.recv().await {
                Some(PortEvent::Frame(PortFrame::Data(message))) => return Some(message),
                Some(PortEvent::Frame(PortFrame::Closing)) => {
                    debug!("Socket {} closed by the bridge", self.port);
                    self.release();
                }
                Some(PortEvent::Frame(frame)) => {
                    warn!("Socket {} received unexpected {frame:?}, ignoring", self.port);
                }
                Some(PortEvent::Closed) | None => {
                    self.closed = true;
                    self.client.forget_port(&self.port);
                }
            }
        }
        None
    }

    /// Closes the socket on both sides. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.client.send(ClientMessage::PortFrame {
            port: self.port.clone(),
            frame: PortFrame::Closing,
        });
        self.release();
    }

    fn release(&mut self) {
        self.closed = true;
        let _ = self.client.send(ClientMessage::PortClose {
            port: self.port.clone(),
        });
        self.client.forget_port(&self.port);
    }
}

impl Drop for ClientSocket {
    fn drop(&mut self) {
        self.close();
    }
}
