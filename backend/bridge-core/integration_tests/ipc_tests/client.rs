use crate::ipc_tests::helpers::{TEST_AUTH_TOKEN, start_test_server, wait_until};

use bridge_core::BridgeClient;
use bridge_core::error::client::ClientError;
use bridge_core::transport::SocketMessage;

use std::time::Duration;

use serde_json::Value;

async fn connected() -> (crate::ipc_tests::helpers::TestServer, BridgeClient) {
    let server = start_test_server().await;
    let client = BridgeClient::connect(&server.url(), TEST_AUTH_TOKEN)
        .await
        .expect("Client should connect");
    (server, client)
}

/// **VALUE**: Verifies typed unary calls round-trip through the client.
///
/// **WHY THIS MATTERS**: This is how UI-side Rust code calls the bridge.
///
/// **BUG THIS CATCHES**: Would catch wrong channel prefixes on the client side.
#[tokio::test]
async fn given_client_when_calling_then_typed_value() {
    let (_server, client) = connected().await;

    let doubled: i64 = client.call("math.double", &21).await.expect("call should succeed");

    assert_eq!(doubled, 42);
}

/// **VALUE**: Verifies handler failures surface as `ClientError::Remote` with the message.
///
/// **WHY THIS MATTERS**: The caller must see the original message, not a transport error.
///
/// **BUG THIS CATCHES**: Would catch error envelopes being decoded as values.
#[tokio::test]
async fn given_failing_operation_when_calling_then_remote_error() {
    let (_server, client) = connected().await;

    let result: Result<Value, _> = client.call("math.fail", &()).await;

    match result {
        Err(ClientError::Remote { source, .. }) => assert_eq!(source.message(), "math is hard"),
        other => panic!("Expected Remote error, got {other:?}"),
    }
}

/// **VALUE**: Verifies a subscription yields every event and then ends.
///
/// **BUG THIS CATCHES**: Would catch the client dropping the terminal sentinel, which
/// makes `next` hang.
#[tokio::test]
async fn given_finite_subscription_when_iterating_then_all_events_then_none() {
    let (_server, client) = connected().await;

    let mut ticks = client.subscribe::<_, u32>("ticks", &3).await.expect("subscribe");
    let mut received = Vec::new();
    while let Some(event) = ticks.next().await {
        received.push(event.expect("no error events expected"));
    }

    assert_eq!(received, vec![0, 1, 2]);
    assert!(ticks.is_finished());
}

/// **VALUE**: Verifies `stop` ends the stream and releases the producer.
///
/// **WHY THIS MATTERS**: Unsubscribing is the normal way to release a live watch.
///
/// **BUG THIS CATCHES**: Would catch a stop that never reaches the bridge, or a
/// stream that does not end after it.
#[tokio::test]
async fn given_endless_subscription_when_stopped_then_stream_ends() {
    let (server, client) = connected().await;

    let mut forever = client.subscribe::<_, u32>("forever", &()).await.expect("subscribe");
    assert_eq!(forever.next().await.expect("first event").expect("message"), 0);
    forever.stop().expect("stop should be sent");
    forever.stop().expect("second stop is a no-op");

    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while forever.next().await.is_some() {}
    })
    .await;

    assert!(drained.is_ok(), "Stream should end after stop");
    wait_until(|| server.stops() == 1).await;
}

/// **VALUE**: Verifies navigation tears down everything the viewport opened, and
/// that the local stream ends with it.
///
/// **WHY THIS MATTERS**: The bridge sends no sentinel to a navigated viewport; a
/// caller looping on `next()` must still get `None`.
///
/// **BUG THIS CATCHES**: Would catch `Navigated` not reaching the viewport, or the
/// event route surviving navigation so `next()` waits forever.
#[tokio::test]
async fn given_live_subscription_when_client_navigates_then_producer_stopped_and_stream_ends() {
    let (server, client) = connected().await;
    let mut forever = client.subscribe::<_, u32>("forever", &()).await.expect("subscribe");
    assert!(forever.next().await.is_some());

    client.navigate().expect("navigate");
    wait_until(|| server.stops() == 1).await;

    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while forever.next().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok(), "Stream should end after navigation");
    assert!(forever.is_finished());
    assert!(client.is_connected(), "Navigation keeps the connection");
}

/// **VALUE**: Verifies subscribing to an unknown operation fails immediately.
///
/// **BUG THIS CATCHES**: Would catch the request waiting forever for `Subscribed`.
#[tokio::test]
async fn given_unknown_operation_when_subscribing_then_remote_error() {
    let (_server, client) = connected().await;

    let result = client.subscribe::<_, u32>("nope", &()).await;

    assert!(matches!(result, Err(ClientError::Remote { .. })));
}

/// **VALUE**: Verifies sockets carry messages both ways once open.
///
/// **BUG THIS CATCHES**: Would catch port frames not being routed by port id.
#[tokio::test]
async fn given_echo_socket_when_sending_then_receives_same_messages() {
    let (_server, client) = connected().await;

    let mut socket = client.open_socket("echo", &()).await.expect("socket should open");
    socket.send("hello").expect("send");
    socket.send(vec![9_u8, 8]).expect("send");

    assert_eq!(socket.recv().await, Some(SocketMessage::from("hello")));
    assert_eq!(socket.recv().await, Some(SocketMessage::Binary(vec![9, 8])));

    socket.close();
    assert!(socket.is_closed());
    assert!(socket.send("late").is_err());
}

/// **VALUE**: Verifies a socket whose setup fails reports the handler's error.
///
/// **BUG THIS CATCHES**: Would catch `ReadyError` being treated as `Ready`.
#[tokio::test]
async fn given_failing_socket_setup_when_opening_then_remote_error() {
    let (_server, client) = connected().await;

    let result = client.open_socket("denied", &()).await;

    match result {
        Err(ClientError::Remote { source, .. }) => assert_eq!(source.message(), "no access"),
        Err(other) => panic!("Expected Remote error, got {other:?}"),
        Ok(_) => panic!("Socket should not open"),
    }
}

/// **VALUE**: Verifies connection-level failures map to distinct errors.
///
/// **WHY THIS MATTERS**: Retrying makes sense for an unreachable bridge, never for a
/// rejected token.
///
/// **BUG THIS CATCHES**: Would catch auth failures reported as connect failures, which
/// `connect_with_retry` would retry forever.
#[tokio::test]
async fn given_bad_url_or_token_when_connecting_then_specific_errors() {
    let server = start_test_server().await;

    let wrong_scheme = BridgeClient::connect("http://127.0.0.1:1", TEST_AUTH_TOKEN).await;
    let wrong_token = BridgeClient::connect(&server.url(), "wrong").await;

    assert!(matches!(wrong_scheme, Err(ClientError::InvalidUrl { .. })));
    assert!(matches!(wrong_token, Err(ClientError::Auth { .. })));
}

/// **VALUE**: Verifies retrying gives up after the configured time.
///
/// **BUG THIS CATCHES**: Would catch `max_elapsed` being ignored.
#[tokio::test]
async fn given_no_server_when_connecting_with_retry_then_connect_error() {
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", unused.local_addr().unwrap());
    drop(unused);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        BridgeClient::connect_with_retry(&url, TEST_AUTH_TOKEN, Duration::from_millis(300)),
    )
    .await
    .expect("retry should give up on its own");

    assert!(matches!(result, Err(ClientError::Connect { .. })));
}

/// **VALUE**: Verifies the client notices a server shutdown.
///
/// **BUG THIS CATCHES**: Would catch pending requests hanging after the connection drops.
#[tokio::test]
async fn given_server_shutdown_when_calling_then_closed_error() {
    let (server, client) = connected().await;

    server.handle.shutdown().await;
    wait_until(|| !client.is_connected()).await;
    let result: Result<i64, _> = client.call("math.double", &1).await;

    assert!(matches!(result, Err(ClientError::Closed { .. })));
}
