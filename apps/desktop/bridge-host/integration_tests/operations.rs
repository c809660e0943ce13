//! End-to-end tests of the host operations over a real IPC connection.

use bridge_host::connection_info::ConnectionInfo;
use bridge_host::operations::{
    self, APP_ECHO, APP_VERSION, CLOCK_TICKS, ECHO_SOCKET, Tick, TickRequest, VersionInfo,
};

use bridge_core::config::IpcConfig;
use bridge_core::error::client::ClientError;
use bridge_core::ipc::{IpcServerHandle, start_ipc_server};
use bridge_core::transport::SocketMessage;
use bridge_core::{Bridge, BridgeClient};

use serde_json::{Value, json};

const TEST_AUTH_TOKEN: &str = "host-test-token";

async fn start_host() -> (IpcServerHandle, BridgeClient) {
    let bridge = Bridge::new();
    operations::register(&bridge).expect("operations should register once");

    let config = IpcConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        auth_token: Some(TEST_AUTH_TOKEN.to_string()),
    };
    let handle = start_ipc_server(&config, bridge)
        .await
        .expect("Server should start");
    let client = BridgeClient::connect(&handle.url(), TEST_AUTH_TOKEN)
        .await
        .expect("Client should connect");
    (handle, client)
}

/// **VALUE**: Verifies the unary host operations answer over the wire.
///
/// **BUG THIS CATCHES**: Would catch `register` forgetting an operation or the
/// echo handler reshaping its input.
#[tokio::test]
async fn given_host_operations_when_calling_unary_then_replies() {
    let (_handle, client) = start_host().await;

    let version: VersionInfo = client.call(APP_VERSION, &()).await.expect("version");
    let echoed: Value = client
        .call(APP_ECHO, &json!({"greeting": "hi", "n": [1, 2]}))
        .await
        .expect("echo");

    assert_eq!(version.name, "bridge-host");
    assert!(!version.version.is_empty());
    assert_eq!(echoed, json!({"greeting": "hi", "n": [1, 2]}));
}

/// **VALUE**: Verifies a bounded tick subscription delivers every tick in order
/// and then completes.
///
/// **WHY THIS MATTERS**: UI code relies on the end of the stream to stop spinners.
///
/// **BUG THIS CATCHES**: Would catch the producer forgetting `complete()` or
/// ticks arriving out of sequence.
#[tokio::test]
async fn given_counted_ticks_when_subscribed_then_all_ticks_then_end() {
    let (_handle, client) = start_host().await;
    let request = TickRequest {
        interval_ms: 10,
        count: Some(3),
    };

    let mut ticks = client
        .subscribe::<_, Tick>(CLOCK_TICKS, &request)
        .await
        .expect("subscribe");

    let mut sequences = Vec::new();
    while let Some(tick) = ticks.next().await {
        let tick = tick.expect("tick");
        assert!(!tick.at.is_empty());
        sequences.push(tick.sequence);
    }

    assert_eq!(sequences, vec![0, 1, 2]);
    assert!(ticks.is_finished());
}

/// **VALUE**: Verifies an invalid tick interval is refused when the stream starts.
///
/// **WHY THIS MATTERS**: The handler only runs after the start signal, so a setup
/// failure reaches the caller as the first event, followed by the end of the stream.
///
/// **BUG THIS CATCHES**: Would catch a 0ms interval spinning a task that floods
/// the connection, or a failed start leaving the stream open.
#[tokio::test]
async fn given_tiny_interval_when_subscribed_then_error_event_then_end() {
    let (_handle, client) = start_host().await;
    let request = TickRequest {
        interval_ms: 1,
        count: None,
    };

    let mut ticks = client
        .subscribe::<_, Tick>(CLOCK_TICKS, &request)
        .await
        .expect("subscribe succeeds before the handler runs");

    match ticks.next().await {
        Some(Err(ClientError::Remote { source, .. })) => {
            assert!(source.message().contains("interval_ms"));
        }
        other => panic!("Expected a remote error event, got {:?}", other.map(|event| event.map(|_| ()))),
    }
    assert!(ticks.next().await.is_none());
    assert!(ticks.is_finished());
}

/// **VALUE**: Verifies an unbounded subscription can be stopped by the client.
///
/// **BUG THIS CATCHES**: Would catch `stop` not reaching the producer, leaving
/// the tick task running after the UI went away.
#[tokio::test]
async fn given_unbounded_ticks_when_stopped_then_stream_ends() {
    let (_handle, client) = start_host().await;
    let request = TickRequest {
        interval_ms: 10,
        count: None,
    };

    let mut ticks = client
        .subscribe::<_, Tick>(CLOCK_TICKS, &request)
        .await
        .expect("subscribe");
    assert!(ticks.next().await.is_some());

    ticks.stop().expect("stop should send");

    let drained = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while ticks.next().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok(), "Stream should end after stop");
}

/// **VALUE**: Verifies the echo socket returns text and binary messages.
///
/// **BUG THIS CATCHES**: Would catch the echo handler replying through the wrong
/// port or dropping binary frames.
#[tokio::test]
async fn given_echo_socket_when_sending_then_messages_come_back() {
    let (_handle, client) = start_host().await;

    let mut socket = client
        .open_socket(ECHO_SOCKET, &())
        .await
        .expect("socket should open");
    socket.send("ping").expect("send text");
    socket.send(vec![1u8, 2, 3]).expect("send binary");

    assert_eq!(socket.recv().await, Some(SocketMessage::from("ping")));
    assert_eq!(socket.recv().await, Some(SocketMessage::Binary(vec![1, 2, 3])));

    socket.close();
    assert!(socket.is_closed());
}

/// **VALUE**: Verifies the connection file describes a server a client can reach.
///
/// **WHY THIS MATTERS**: UI processes discover the bridge only through this file.
///
/// **BUG THIS CATCHES**: Would catch the file recording the configured port (0)
/// instead of the bound one.
#[tokio::test]
async fn given_running_server_when_connection_info_written_then_client_connects() {
    let (handle, _client) = start_host().await;
    let dir = tempfile::TempDir::new().unwrap();

    ConnectionInfo::from(&handle).write(dir.path()).unwrap();
    let info = ConnectionInfo::read(dir.path()).unwrap();

    assert_ne!(info.port(), 0);
    let client = BridgeClient::connect(info.url(), info.auth_token())
        .await
        .expect("Client should connect using the published details");
    assert!(client.is_connected());

    handle.shutdown().await;
}
