//! Test helpers for IPC integration tests.
//!
//! - Starting a server with a demo registry on a free port
//! - Raw WebSocket access for protocol-level tests
//! - Authentication helpers

use bridge_core::config::IpcConfig;
use bridge_core::error::BoxError;
use bridge_core::ipc::{IpcServerHandle, start_ipc_server};
use bridge_core::protocol::{ClientMessage, ServerMessage};
use bridge_core::{Bridge, EventSink, SocketHooks};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test constants for authentication
pub const TEST_AUTH_TOKEN: &str = "test-token-12345";

/// A running server plus the counters its demo operations update.
pub struct TestServer {
    pub handle: IpcServerHandle,
    pub stops: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn url(&self) -> String {
        self.handle.url()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

/// Registers the demo operations used across the integration tests:
///
/// - `math.double` (unary) doubles an integer
/// - `math.fail` (unary) always fails
/// - `ticks` (subscription) emits `0..count`, then completes
/// - `forever` (subscription) emits until stopped
/// - `echo` (socket) sends every message back
/// - `denied` (socket) fails setup
pub fn demo_bridge(stops: Arc<AtomicUsize>) -> Bridge {
    let bridge = Bridge::new();

    bridge
        .handle("math.double", |n: i64| async move { Ok::<_, BoxError>(n * 2) })
        .unwrap();
    bridge
        .handle("math.fail", |_: Value| async move { Err::<(), _>("math is hard") })
        .unwrap();

    bridge
        .provide_subscription("ticks", |count: u32, sink: EventSink<u32>| {
            let task = tokio::spawn(async move {
                for n in 0..count {
                    sink.emit(n);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                sink.complete();
            });
            Ok::<_, BoxError>(move || task.abort())
        })
        .unwrap();

    bridge
        .provide_subscription("forever", move |_: Value, sink: EventSink<u32>| {
            let task = tokio::spawn(async move {
                let mut n = 0;
                while !sink.is_closed() {
                    sink.emit(n);
                    n += 1;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            });
            let stops = Arc::clone(&stops);
            Ok::<_, BoxError>(move || {
                stops.fetch_add(1, Ordering::SeqCst);
                task.abort();
            })
        })
        .unwrap();

    bridge
        .provide_socket("echo", |_: Value, hooks: SocketHooks| {
            let replies = hooks.clone();
            hooks.on_message(move |message| {
                replies.send(message);
            });
            async { Ok::<(), BoxError>(()) }
        })
        .unwrap();
    bridge
        .provide_socket("denied", |_: Value, _: SocketHooks| async { Err::<(), _>("no access") })
        .unwrap();

    bridge
}

/// Test helper: Start an IPC server with the demo bridge on a free port.
pub async fn start_test_server() -> TestServer {
    let stops = Arc::new(AtomicUsize::new(0));
    let config = IpcConfig {
        port: 0,
        auth_token: Some(TEST_AUTH_TOKEN.to_string()),
        ..IpcConfig::default()
    };
    let handle = start_ipc_server(&config, demo_bridge(Arc::clone(&stops)))
        .await
        .expect("Failed to start IPC server");
    TestServer { handle, stops }
}

/// Test helper: Connect to IPC server and return WebSocket stream.
pub async fn connect_to_server(url: &str) -> WsStream {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket server");
    ws_stream
}

/// Test helper: Send a JSON client message.
pub async fn send_json(ws: &mut WsStream, message: &ClientMessage) {
    let text = serde_json::to_string(message).expect("Failed to encode message");
    ws.send(Message::Text(text.into()))
        .await
        .expect("Failed to send message");
}

/// Test helper: Receive and decode the next server message.
pub async fn receive_json(ws: &mut WsStream) -> ServerMessage {
    let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Timed out waiting for a message")
        .expect("No message received")
        .expect("Error receiving message");

    let text = message.into_text().expect("Expected a text frame");
    serde_json::from_str(&text).expect("Failed to decode server message")
}

/// Test helper: Send auth handshake and return whether it succeeded.
pub async fn authenticate(ws: &mut WsStream, token: &str) -> bool {
    send_json(
        ws,
        &ClientMessage::AuthHandshake {
            token: token.to_string(),
        },
    )
    .await;

    match receive_json(ws).await {
        ServerMessage::AuthResult { success, .. } => success,
        other => panic!("Expected AuthResult, got {other:?}"),
    }
}

/// Test helper: Check if WebSocket connection is closed.
pub async fn is_connection_closed(ws: &mut WsStream) -> bool {
    match tokio::time::timeout(Duration::from_millis(500), ws.next()).await {
        Err(_) => false,
        Ok(None) => true,
        Ok(Some(Ok(Message::Close(_)))) => true,
        Ok(Some(Ok(_))) => false,
        Ok(Some(Err(_))) => true,
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "Condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
