mod config;
mod envelope;
mod subscription;
mod viewport;

use crate::protocol::ServerMessage;

use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;

/// Everything queued in a viewport outbox right now.
pub(crate) fn drain(outbox: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
    let mut messages = Vec::new();
    while let Ok(message) = outbox.try_recv() {
        messages.push(message);
    }
    messages
}

/// Polls `condition` until it holds, failing the test after one second.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Condition not met within one second"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
