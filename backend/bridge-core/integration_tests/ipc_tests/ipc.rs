use crate::ipc_tests::helpers::{
    TEST_AUTH_TOKEN, authenticate, connect_to_server, is_connection_closed, receive_json, send_json,
    start_test_server, wait_until,
};

use bridge_core::channel::{ChannelKind, channel_for};
use bridge_core::envelope::UnaryEnvelope;
use bridge_core::protocol::{ClientMessage, ServerMessage};

use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

/// **VALUE**: Verifies a client with the right token is accepted.
///
/// **WHY THIS MATTERS**: Every other interaction depends on the handshake.
///
/// **BUG THIS CATCHES**: Would catch a token comparison against the wrong value.
#[tokio::test]
async fn given_valid_token_when_authenticating_then_success() {
    // GIVEN: IPC server running on a free port
    let server = start_test_server().await;

    // WHEN: Client connects and sends the right token
    let mut ws = connect_to_server(&server.url()).await;
    let success = authenticate(&mut ws, TEST_AUTH_TOKEN).await;

    // THEN: Handshake succeeds
    assert!(success, "Auth should succeed");
    server.handle.shutdown().await;
}

/// **VALUE**: Verifies a wrong token is rejected and the connection closed.
///
/// **WHY THIS MATTERS**: The token is the only thing keeping other local processes
/// from invoking registered operations.
///
/// **BUG THIS CATCHES**: Would catch a server that answers `success: false` but keeps
/// routing messages.
#[tokio::test]
async fn given_wrong_token_when_authenticating_then_rejected_and_closed() {
    let server = start_test_server().await;
    let mut ws = connect_to_server(&server.url()).await;

    let success = authenticate(&mut ws, "wrong-token").await;

    assert!(!success, "Auth should fail");
    assert!(is_connection_closed(&mut ws).await, "Connection should close");
}

/// **VALUE**: Verifies the first message must be the handshake.
///
/// **BUG THIS CATCHES**: Would catch requests being served before authentication.
#[tokio::test]
async fn given_call_before_auth_when_sent_then_rejected() {
    let server = start_test_server().await;
    let mut ws = connect_to_server(&server.url()).await;

    send_json(
        &mut ws,
        &ClientMessage::Call {
            request_id: 1,
            channel: channel_for(ChannelKind::Unary, "math.double"),
            input: json!(1),
        },
    )
    .await;

    match receive_json(&mut ws).await {
        ServerMessage::AuthResult { success, .. } => assert!(!success),
        other => panic!("Expected AuthResult, got {other:?}"),
    }
    assert!(is_connection_closed(&mut ws).await);
}

/// **VALUE**: Verifies unary calls are answered with the matching request id.
///
/// **WHY THIS MATTERS**: Replies are correlated by request id; calls may complete out
/// of order.
///
/// **BUG THIS CATCHES**: Would catch lost request ids or swapped envelopes.
#[tokio::test]
async fn given_authenticated_when_calling_then_reply_with_request_id() {
    let server = start_test_server().await;
    let mut ws = connect_to_server(&server.url()).await;
    assert!(authenticate(&mut ws, TEST_AUTH_TOKEN).await);

    send_json(
        &mut ws,
        &ClientMessage::Call {
            request_id: 7,
            channel: channel_for(ChannelKind::Unary, "math.double"),
            input: json!(21),
        },
    )
    .await;

    assert_eq!(
        receive_json(&mut ws).await,
        ServerMessage::Reply {
            request_id: 7,
            envelope: UnaryEnvelope::Value(json!(42)),
        }
    );
}

/// **VALUE**: Verifies a malformed message is reported without dropping the connection.
///
/// **WHY THIS MATTERS**: Protocol violations are diagnosed, never fatal.
///
/// **BUG THIS CATCHES**: Would catch the read loop exiting on a decode error.
#[tokio::test]
async fn given_malformed_message_when_sent_then_protocol_error_and_still_usable() {
    let server = start_test_server().await;
    let mut ws = connect_to_server(&server.url()).await;
    assert!(authenticate(&mut ws, TEST_AUTH_TOKEN).await);

    futures_util::SinkExt::send(&mut ws, Message::Text("{\"type\":\"nope\"}".into()))
        .await
        .unwrap();
    assert!(matches!(
        receive_json(&mut ws).await,
        ServerMessage::ProtocolError { .. }
    ));

    send_json(
        &mut ws,
        &ClientMessage::Call {
            request_id: 2,
            channel: channel_for(ChannelKind::Unary, "math.double"),
            input: json!(2),
        },
    )
    .await;
    assert!(matches!(
        receive_json(&mut ws).await,
        ServerMessage::Reply { request_id: 2, .. }
    ));
}

/// **VALUE**: Verifies the raw subscription flow: id first, events only after start.
///
/// **WHY THIS MATTERS**: This is the wire contract UI code is written against.
///
/// **BUG THIS CATCHES**: Would catch events sent before `start`, or a missing `null`.
#[tokio::test]
async fn given_subscribe_when_started_then_events_then_null() {
    let server = start_test_server().await;
    let mut ws = connect_to_server(&server.url()).await;
    assert!(authenticate(&mut ws, TEST_AUTH_TOKEN).await);

    send_json(
        &mut ws,
        &ClientMessage::Subscribe {
            request_id: 3,
            channel: channel_for(ChannelKind::Subscription, "ticks"),
            input: json!(2),
        },
    )
    .await;
    let channel = match receive_json(&mut ws).await {
        ServerMessage::Subscribed { request_id: 3, channel } => channel,
        other => panic!("Expected Subscribed, got {other:?}"),
    };

    send_json(
        &mut ws,
        &ClientMessage::Signal {
            channel: channel.start_signal(),
        },
    )
    .await;

    let mut received = Vec::new();
    loop {
        match receive_json(&mut ws).await {
            ServerMessage::Event { channel: on, event } => {
                assert_eq!(on, channel);
                let done = event.is_none();
                received.push(event.and_then(|event| event.message));
                if done {
                    break;
                }
            }
            other => panic!("Expected Event, got {other:?}"),
        }
    }
    assert_eq!(received, vec![Some(json!(0)), Some(json!(1)), None]);
}

/// **VALUE**: Verifies closing the connection stops the subscriptions it opened.
///
/// **WHY THIS MATTERS**: A crashed or closed UI process never sends `stop`; its live
/// producers must still be released.
///
/// **BUG THIS CATCHES**: Would catch the connection's viewport not being destroyed.
#[tokio::test]
async fn given_live_subscription_when_connection_closes_then_producer_stopped() {
    let server = start_test_server().await;
    let mut ws = connect_to_server(&server.url()).await;
    assert!(authenticate(&mut ws, TEST_AUTH_TOKEN).await);

    send_json(
        &mut ws,
        &ClientMessage::Subscribe {
            request_id: 4,
            channel: channel_for(ChannelKind::Subscription, "forever"),
            input: json!(null),
        },
    )
    .await;
    let ServerMessage::Subscribed { channel, .. } = receive_json(&mut ws).await else {
        panic!("Expected Subscribed");
    };
    send_json(
        &mut ws,
        &ClientMessage::Signal {
            channel: channel.start_signal(),
        },
    )
    .await;
    assert!(matches!(receive_json(&mut ws).await, ServerMessage::Event { .. }));

    ws.close(None).await.unwrap();
    drop(ws);

    wait_until(|| server.stops() == 1).await;
}

/// **VALUE**: Verifies server shutdown reaches connections that are already open.
///
/// **WHY THIS MATTERS**: The host shuts down on Ctrl-C while UI windows are still
/// connected; their live producers must be released, not just the accept loop.
///
/// **BUG THIS CATCHES**: Would catch connection tasks listening on a shutdown
/// receiver that never sees the broadcast.
#[tokio::test]
async fn given_live_subscription_when_server_shuts_down_then_producer_stopped() {
    let server = start_test_server().await;
    let mut ws = connect_to_server(&server.url()).await;
    assert!(authenticate(&mut ws, TEST_AUTH_TOKEN).await);

    send_json(
        &mut ws,
        &ClientMessage::Subscribe {
            request_id: 5,
            channel: channel_for(ChannelKind::Subscription, "forever"),
            input: json!(null),
        },
    )
    .await;
    let ServerMessage::Subscribed { channel, .. } = receive_json(&mut ws).await else {
        panic!("Expected Subscribed");
    };
    send_json(
        &mut ws,
        &ClientMessage::Signal {
            channel: channel.start_signal(),
        },
    )
    .await;
    assert!(matches!(receive_json(&mut ws).await, ServerMessage::Event { .. }));

    let stops = std::sync::Arc::clone(&server.stops);
    server.handle.shutdown().await;

    wait_until(|| stops.load(std::sync::atomic::Ordering::SeqCst) == 1).await;
}
