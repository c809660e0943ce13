//! IPC WebSocket server implementation.
//!
//! Every accepted connection is one UI viewport. The server:
//!
//! - Listens on a loopback address only
//! - Uses JSON text frames (see [`crate::protocol`])
//! - Requires an authentication handshake as the first message
//! - Routes calls, subscriptions and sockets into a shared [`Bridge`]
//!
//! # Lifecycle
//!
//! When a connection ends (client disconnect, read error, server shutdown)
//! its viewport is destroyed. Subscriptions stop their producers and sockets
//! close their ports, without delivering anything further.

use crate::config::IpcConfig;
use crate::dispatch::Bridge;
use crate::envelope::{ErrorInfo, UnaryEnvelope};
use crate::error::ipc::IpcError;
use crate::ipc::connection_state::{ConnectionState, PortTable};
use crate::ipc::handle::IpcServerHandle;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{MessagePort, Viewport};

use common::ErrorLocation;

use std::net::SocketAddr;
use std::panic::Location;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use uuid::Uuid;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Starts the IPC WebSocket server.
///
/// Binds `config.host:config.port` (port `0` picks a free port, see
/// [`IpcServerHandle::port`]) and spawns the accept loop.
///
/// # Errors
///
/// Returns [`IpcError::Io`] if the address cannot be bound, and
/// [`IpcError::Auth`] if the host is not a loopback address.
pub async fn start_ipc_server(config: &IpcConfig, bridge: Bridge) -> Result<IpcServerHandle, IpcError> {
    let auth_token = config.auth_token.clone().unwrap_or_else(|| {
        let token = Uuid::new_v4().to_string();
        info!("Generated IPC auth token");
        token
    });

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let local_addr = listener.local_addr()?;
    if !local_addr.ip().is_loopback() {
        return Err(IpcError::Auth {
            message: format!("Refusing to serve IPC on non-loopback address {local_addr}"),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    info!("IPC server listening on {}", local_addr);

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let connection_shutdown = shutdown_rx.clone();
    let token = auth_token.clone();
    let accept_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.wait_for(|stop| *stop) => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("Client connecting from {}", addr);
                        let connection = handle_connection(
                            stream,
                            addr,
                            token.clone(),
                            bridge.clone(),
                            connection_shutdown.clone(),
                        );
                        tokio::spawn(async move {
                            if let Err(e) = connection.await {
                                error!("Connection from {} failed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept IPC connection: {}", e),
                },
            }
        }
        info!("IPC server on {} stopped accepting connections", local_addr);
    });

    Ok(IpcServerHandle {
        local_addr,
        auth_token,
        shutdown_tx,
        accept_task,
    })
}

/// Handles a single WebSocket connection.
///
/// 1. Rejects non-loopback peers
/// 2. Performs the WebSocket upgrade
/// 3. Requires `auth_handshake` as the first message
/// 4. Routes messages until the peer leaves or the server shuts down
/// 5. Destroys the connection's viewport
///
/// # Errors
///
/// - [`IpcError::Handshake`] - WebSocket upgrade failed
/// - [`IpcError::Auth`] - wrong token or wrong first message
/// - [`IpcError::Read`] - reading from the socket failed
/// - [`IpcError::Encode`] / [`IpcError::Send`] - answering the handshake failed
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    auth_token: String,
    bridge: Bridge,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), IpcError> {
    if !addr.ip().is_loopback() {
        warn!("Rejected non-loopback connection from {}", addr);
        return Ok(());
    }

    let ws_stream = accept_async(stream).await.map_err(|e| IpcError::Handshake {
        message: format!("WebSocket handshake failed: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    let (mut write, mut read) = ws_stream.split();
    let state = ConnectionState::new(auth_token);

    let token = match read.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::AuthHandshake { token }) => token,
            Ok(_) => {
                warn!("Client {} auth failed: first message was not auth handshake", addr);
                send_auth_result(&mut write, false, Some("Expected auth_handshake")).await?;
                return Err(auth_error("first message was not auth handshake"));
            }
            Err(e) => {
                warn!("Client {} sent undecodable first message: {}", addr, e);
                send_auth_result(&mut write, false, Some("Invalid message")).await?;
                return Err(auth_error("undecodable first message"));
            }
        },
        Some(Ok(_)) => {
            warn!("Client {} sent non-text first message", addr);
            return Err(auth_error("non-text first message"));
        }
        Some(Err(e)) => {
            return Err(IpcError::Read {
                message: format!("Error reading first message: {e}"),
                location: ErrorLocation::from(Location::caller()),
            });
        }
        None => {
            warn!("Client {} disconnected before sending auth", addr);
            return Ok(());
        }
    };

    if !state.validate_token(&token) {
        warn!("Client {} auth failed: invalid token", addr);
        send_auth_result(&mut write, false, Some("Invalid authentication token")).await?;
        return Err(auth_error("invalid token"));
    }
    send_auth_result(&mut write, true, None).await?;

    let (viewport, outbox) = Viewport::new();
    info!("Client {} authenticated as viewport {}", addr, viewport.id());
    let writer = tokio::spawn(write_outbox(write, outbox, addr));

    let connection = Connection {
        addr,
        bridge,
        viewport,
        state,
    };

    let mut result = Ok(());
    loop {
        let next = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            next = read.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => connection.route(message),
                Err(e) => {
                    warn!("Client {} sent undecodable message: {}", addr, e);
                    connection.protocol_error(format!("Invalid message: {e}"));
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
            Some(Ok(_)) => warn!("Client {} sent non-text message, ignoring", addr),
            Some(Err(e)) => {
                result = Err(IpcError::Read {
                    message: format!("Error reading message: {e}"),
                    location: ErrorLocation::from(Location::caller()),
                });
                break;
            }
        }
    }

    connection.viewport.destroy();
    connection.state.close_all_ports();
    writer.abort();
    info!("Client {} disconnected", addr);
    result
}

struct Connection {
    addr: SocketAddr,
    bridge: Bridge,
    viewport: Viewport,
    state: ConnectionState,
}

impl Connection {
    fn route(&self, message: ClientMessage) {
        match message {
            ClientMessage::AuthHandshake { .. } => {
                self.protocol_error("Connection is already authenticated".to_string());
            }
            ClientMessage::Call {
                request_id,
                channel,
                input,
            } => {
                let bridge = self.bridge.clone();
                let viewport = self.viewport.clone();
                tokio::spawn(async move {
                    let envelope = bridge.call(&channel, input).await;
                    viewport.send(ServerMessage::Reply { request_id, envelope });
                });
            }
            ClientMessage::Subscribe {
                request_id,
                channel,
                input,
            } => {
                let reply = match self.bridge.open_subscription(&channel, input) {
                    Ok(channel) => ServerMessage::Subscribed { request_id, channel },
                    Err(e) => ServerMessage::Reply {
                        request_id,
                        envelope: UnaryEnvelope::Error(ErrorInfo::from(e)),
                    },
                };
                self.viewport.send(reply);
            }
            ClientMessage::Signal { channel } => {
                self.bridge.signal(&channel, &self.viewport);
            }
            ClientMessage::OpenSocket { channel, port, input } => self.open_socket(channel, port, input),
            ClientMessage::PortFrame { port, frame } => match self.state.port(&port) {
                Some(remote) => {
                    if !remote.post(frame) {
                        debug!("Port {} is closed, dropping frame from {}", port, self.addr);
                    }
                }
                None => debug!("Frame for unknown port {} from {}", port, self.addr),
            },
            ClientMessage::PortClose { port } => {
                if let Some(remote) = self.state.port(&port) {
                    remote.close();
                }
            }
            ClientMessage::Navigated => {
                debug!("Viewport {} navigated", self.viewport.id());
                self.viewport.navigate();
            }
        }
    }

    fn open_socket(&self, channel: String, port: String, input: Value) {
        let (local, remote) = MessagePort::pair();
        let remote = Arc::new(remote);
        if !self.state.insert_port(&port, Arc::clone(&remote)) {
            self.protocol_error(format!("Port {port} is already open"));
            return;
        }

        tokio::spawn(forward_port(
            port,
            remote,
            self.viewport.clone(),
            self.state.port_table(),
        ));

        let bridge = self.bridge.clone();
        let viewport = self.viewport.clone();
        tokio::spawn(async move {
            bridge.open_socket(&channel, input, local, viewport).await;
        });
    }

    fn protocol_error(&self, message: String) {
        self.viewport.send(ServerMessage::ProtocolError { message });
    }
}

/// Relays frames posted by a socket handler to the client, then reports the close.
async fn forward_port(id: String, port: Arc<MessagePort>, viewport: Viewport, table: PortTable) {
    while let Some(frame) = port.recv().await {
        viewport.send(ServerMessage::PortFrame {
            port: id.clone(),
            frame,
        });
    }
    table.remove(&id);
    viewport.send(ServerMessage::PortClosed { port: id });
}

async fn write_outbox(mut write: WsSink, mut outbox: UnboundedReceiver<ServerMessage>, addr: SocketAddr) {
    while let Some(message) = outbox.recv().await {
        if let Err(e) = send_message(&mut write, &message).await {
            error!("Failed to write to {}: {}", addr, e);
            break;
        }
    }
}

async fn send_auth_result(write: &mut WsSink, success: bool, error: Option<&str>) -> Result<(), IpcError> {
    let message = ServerMessage::AuthResult {
        success,
        error: error.map(str::to_string),
    };
    send_message(write, &message).await
}

async fn send_message(write: &mut WsSink, message: &ServerMessage) -> Result<(), IpcError> {
    let text = serde_json::to_string(message).map_err(|e| IpcError::Encode {
        message: format!("Failed to encode server message: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })?;

    write
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| IpcError::Send {
            message: format!("Failed to send server message: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })
}

#[track_caller]
fn auth_error(reason: &str) -> IpcError {
    IpcError::Auth {
        message: format!("Authentication failed: {reason}"),
        location: ErrorLocation::from(Location::caller()),
    }
}
