//! Client side of the bridge: what a UI process uses to reach registered
//! operations over the IPC WebSocket.
//!
//! One [`BridgeClient`] is one connection, hence one viewport on the server.
//! Replies, subscription events and port frames are demultiplexed by a
//! reader task; everything outbound goes through a single writer task.

mod socket;
mod subscription;

pub use socket::ClientSocket;
pub use subscription::Subscription;

use crate::channel::{ChannelId, ChannelKind, channel_for};
use crate::envelope::{SubscriptionEvent, UnaryEnvelope};
use crate::error::client::ClientError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::PortFrame;

use common::ErrorLocation;

use std::collections::HashMap;
use std::mem::take;
use std::panic::Location;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use backoff::{ExponentialBackoff, backoff::Backoff};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) enum Outgoing {
    Message(ClientMessage),
    Close,
}

pub(crate) enum PortEvent {
    Frame(PortFrame),
    Closed,
}

#[derive(Default)]
struct Routes {
    closed: bool,
    pending: HashMap<u64, oneshot::Sender<ServerMessage>>,
    events: HashMap<ChannelId, UnboundedSender<Option<SubscriptionEvent>>>,
    ports: HashMap<String, UnboundedSender<PortEvent>>,
}

pub(crate) struct ClientInner {
    outgoing: UnboundedSender<Outgoing>,
    routes: Mutex<Routes>,
    next_request: AtomicU64,
    next_port: AtomicU64,
}

impl ClientInner {
    pub(crate) fn send(&self, message: ClientMessage) -> Result<(), ClientError> {
        self.outgoing
            .send(Outgoing::Message(message))
            .map_err(|_| ClientError::closed("Connection to the bridge is closed"))
    }

    pub(crate) fn forget_events(&self, channel: &ChannelId) {
        self.routes().events.remove(channel);
    }

    pub(crate) fn forget_port(&self, port: &str) {
        self.routes().ports.remove(port);
    }

    /// Drops every event route; each subscription sees the end of its stream.
    fn end_subscriptions(&self) {
        let ended = take(&mut self.routes().events);
        debug!("Ending {} subscriptions after navigation", ended.len());
    }

    fn routes(&self) -> MutexGuard<'_, Routes> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn request(&self, build: impl FnOnce(u64) -> ClientMessage) -> Result<ServerMessage, ClientError> {
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut routes = self.routes();
            if routes.closed {
                return Err(ClientError::closed("Connection to the bridge is closed"));
            }
            routes.pending.insert(request_id, reply_tx);
        }

        if let Err(e) = self.send(build(request_id)) {
            self.routes().pending.remove(&request_id);
            return Err(e);
        }

        reply_rx
            .await
            .map_err(|_| ClientError::closed("Connection closed before the reply arrived"))
    }

    fn route(&self, message: ServerMessage) {
        match message {
            ServerMessage::Reply { request_id, .. } | ServerMessage::Subscribed { request_id, .. } => {
                let waiter = self.routes().pending.remove(&request_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(message);
                    }
                    None => debug!("Reply for unknown request {request_id}"),
                }
            }
            ServerMessage::Event { channel, event } => {
                let mut routes = self.routes();
                let terminal = event.is_none();
                match routes.events.get(&channel) {
                    Some(events) => {
                        let _ = events.send(event);
                    }
                    None => trace!("Event on {channel} with no subscriber"),
                }
                if terminal {
                    routes.events.remove(&channel);
                }
            }
            ServerMessage::PortFrame { port, frame } => match self.routes().ports.get(&port) {
                Some(frames) => {
                    let _ = frames.send(PortEvent::Frame(frame));
                }
                None => trace!("Frame on unknown port {port}"),
            },
            ServerMessage::PortClosed { port } => {
                if let Some(frames) = self.routes().ports.remove(&port) {
                    let _ = frames.send(PortEvent::Closed);
                }
            }
            ServerMessage::ProtocolError { message } => warn!("Bridge reported a protocol error: {message}"),
            ServerMessage::AuthResult { .. } => warn!("Unexpected auth result after handshake"),
        }
    }

    /// Fails every waiter. Dropping the senders ends subscriptions and sockets.
    fn shut(&self) {
        let mut routes = self.routes();
        routes.closed = true;
        routes.pending.clear();
        routes.events.clear();
        routes.ports.clear();
    }
}

/// Connection from a UI process to a running bridge.
///
/// Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct BridgeClient {
    inner: Arc<ClientInner>,
}

impl BridgeClient {
    /// Connects to `url` (`ws://` or `wss://`) and authenticates with `token`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::InvalidUrl`] - unparsable URL or wrong scheme
    /// - [`ClientError::Connect`] - the WebSocket could not be opened
    /// - [`ClientError::Auth`] - the bridge rejected the token
    pub async fn connect(url: &str, token: &str) -> Result<Self, ClientError> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidUrl {
                message: format!("Expected a ws:// or wss:// URL, got {url}"),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();
        authenticate(&mut write, &mut read, token).await?;
        info!("Connected to bridge at {url}");

        let (outgoing, outbox) = unbounded_channel();
        let inner = Arc::new(ClientInner {
            outgoing,
            routes: Mutex::new(Routes::default()),
            next_request: AtomicU64::new(1),
            next_port: AtomicU64::new(0),
        });

        tokio::spawn(write_outgoing(write, outbox));
        tokio::spawn(read_incoming(read, Arc::downgrade(&inner)));

        Ok(Self { inner })
    }

    /// Like [`connect`](Self::connect), retrying connection failures with
    /// exponential backoff for at most `max_elapsed`.
    ///
    /// Authentication and URL errors are not retried.
    pub async fn connect_with_retry(url: &str, token: &str, max_elapsed: Duration) -> Result<Self, ClientError> {
        let mut backoff = ExponentialBackoff {
            max_elapsed_time: Some(max_elapsed),
            ..Default::default()
        };

        loop {
            match Self::connect(url, token).await {
                Ok(client) => return Ok(client),
                Err(error @ ClientError::Connect { .. }) => match backoff.next_backoff() {
                    Some(duration) => {
                        trace!("Bridge not reachable, retrying after {duration:?}");
                        tokio::time::sleep(duration).await;
                    }
                    None => return Err(error),
                },
                Err(error) => return Err(error),
            }
        }
    }

    /// Invokes the unary operation `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Remote`] carrying the operation's error, or a
    /// transport error.
    pub async fn call<I, O>(&self, operation: &str, input: &I) -> Result<O, ClientError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let channel = channel_for(ChannelKind::Unary, operation);
        let input = encode(input)?;
        let reply = self
            .inner
            .request(|request_id| ClientMessage::Call {
                request_id,
                channel,
                input,
            })
            .await?;

        match reply {
            ServerMessage::Reply { envelope, .. } => decode(envelope.into_result()?),
            other => Err(unexpected(&other)),
        }
    }

    /// Subscribes to `operation`. Events start flowing right away.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Remote`] if the operation is unknown.
    pub async fn subscribe<I, O>(&self, operation: &str, input: &I) -> Result<Subscription<O>, ClientError>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let channel = channel_for(ChannelKind::Subscription, operation);
        let input = encode(input)?;
        let reply = self
            .inner
            .request(|request_id| ClientMessage::Subscribe {
                request_id,
                channel,
                input,
            })
            .await?;

        let channel = match reply {
            ServerMessage::Subscribed { channel, .. } => channel,
            ServerMessage::Reply {
                envelope: UnaryEnvelope::Error(error),
                ..
            } => return Err(error.into_remote().into()),
            other => return Err(unexpected(&other)),
        };

        let (events_tx, events_rx) = unbounded_channel();
        self.inner.routes().events.insert(channel.clone(), events_tx);
        self.inner.send(ClientMessage::Signal {
            channel: channel.start_signal(),
        })?;

        debug!("Subscribed on {channel}");
        Ok(Subscription::new(channel, events_rx, Arc::clone(&self.inner)))
    }

    /// Opens a socket on `operation` and waits until its setup completed.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Remote`] if setup failed on the bridge, or
    /// [`ClientError::Closed`] if the socket closed during setup.
    pub async fn open_socket<I>(&self, operation: &str, input: &I) -> Result<ClientSocket, ClientError>
    where
        I: Serialize + ?Sized,
    {
        let channel = channel_for(ChannelKind::Socket, operation);
        let input = encode(input)?;
        let port = format!("port-{}", self.inner.next_port.fetch_add(1, Ordering::Relaxed));

        let (frames_tx, mut frames_rx) = unbounded_channel();
        self.inner.routes().ports.insert(port.clone(), frames_tx);
        if let Err(e) = self.inner.send(ClientMessage::OpenSocket {
            channel,
            port: port.clone(),
            input,
        }) {
            self.inner.forget_port(&port);
            return Err(e);
        }

        loop {
            match frames_rx.recv().await {
                Some(PortEvent::Frame(PortFrame::Ready)) => break,
                Some(PortEvent::Frame(PortFrame::ReadyError(error))) => {
                    self.inner.forget_port(&port);
                    return Err(error.into_remote().into());
                }
                Some(PortEvent::Frame(frame)) => {
                    warn!("Port {port} sent {frame:?} before setup completed, ignoring");
                }
                Some(PortEvent::Closed) | None => {
                    self.inner.forget_port(&port);
                    return Err(ClientError::closed(format!("Port {port} closed during setup")));
                }
            }
        }

        debug!("Socket {port} ready");
        Ok(ClientSocket::new(port, frames_rx, Arc::clone(&self.inner)))
    }

    /// Tells the bridge this viewport navigated away, tearing down every
    /// subscription and socket opened over this connection.
    ///
    /// The bridge sends nothing more to a navigated subscription, so every
    /// open [`Subscription`] ends here: `next()` returns `None` once the
    /// events already received are drained. Sockets end through `PortClosed`.
    pub fn navigate(&self) -> Result<(), ClientError> {
        self.inner.send(ClientMessage::Navigated)?;
        self.inner.end_subscriptions();
        Ok(())
    }

    /// Closes the connection. The bridge destroys this viewport.
    pub fn disconnect(&self) {
        let _ = self.inner.outgoing.send(Outgoing::Close);
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.routes().closed
    }
}

async fn authenticate(
    write: &mut SplitSink<WsStream, Message>,
    read: &mut SplitStream<WsStream>,
    token: &str,
) -> Result<(), ClientError> {
    let handshake = ClientMessage::AuthHandshake {
        token: token.to_string(),
    };
    write.send(Message::Text(to_text(&handshake)?.into())).await?;

    let message = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(_)) | None => {
                return Err(ClientError::Auth {
                    message: "Connection closed during authentication".to_string(),
                    location: ErrorLocation::from(Location::caller()),
                });
            }
            Some(Err(e)) => return Err(e.into()),
        }
    };

    match serde_json::from_str::<ServerMessage>(&message) {
        Ok(ServerMessage::AuthResult { success: true, .. }) => Ok(()),
        Ok(ServerMessage::AuthResult { error, .. }) => Err(ClientError::Auth {
            message: error.unwrap_or_else(|| "Authentication rejected".to_string()),
            location: ErrorLocation::from(Location::caller()),
        }),
        Ok(other) => Err(unexpected(&other)),
        Err(e) => Err(ClientError::Decode {
            message: format!("Invalid auth result: {e}"),
            location: ErrorLocation::from(Location::caller()),
        }),
    }
}

async fn write_outgoing(mut write: SplitSink<WsStream, Message>, mut outbox: UnboundedReceiver<Outgoing>) {
    while let Some(outgoing) = outbox.recv().await {
        let result = match outgoing {
            Outgoing::Message(message) => match to_text(&message) {
                Ok(text) => write.send(Message::Text(text.into())).await,
                Err(e) => {
                    warn!("Dropping outbound message: {e}");
                    continue;
                }
            },
            Outgoing::Close => break,
        };
        if let Err(e) = result {
            warn!("Failed to write to bridge: {e}");
            return;
        }
    }
    // Explicit disconnect, or every handle to the connection was dropped.
    let _ = write.send(Message::Close(None)).await;
}

async fn read_incoming(mut read: SplitStream<WsStream>, inner: Weak<ClientInner>) {
    while let Some(message) = read.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(message) => match inner.upgrade() {
                    Some(inner) => inner.route(message),
                    None => break,
                },
                Err(e) => warn!("Undecodable message from bridge: {e}"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Connection to bridge failed: {e}");
                break;
            }
        }
    }
    info!("Disconnected from bridge");
    if let Some(inner) = inner.upgrade() {
        inner.shut();
    }
}

fn to_text(message: &ClientMessage) -> Result<String, ClientError> {
    serde_json::to_string(message).map_err(|e| ClientError::Encode {
        message: e.to_string(),
        location: ErrorLocation::from(Location::caller()),
    })
}

#[track_caller]
fn encode<I: Serialize + ?Sized>(input: &I) -> Result<Value, ClientError> {
    serde_json::to_value(input).map_err(|e| ClientError::Encode {
        message: format!("Failed to encode input: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })
}

#[track_caller]
pub(crate) fn decode<O: DeserializeOwned>(value: Value) -> Result<O, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode {
        message: format!("Failed to decode output: {e}"),
        location: ErrorLocation::from(Location::caller()),
    })
}

#[track_caller]
fn unexpected(message: &ServerMessage) -> ClientError {
    ClientError::Decode {
        message: format!("Unexpected message from bridge: {message:?}"),
        location: ErrorLocation::from(Location::caller()),
    }
}
