//! Operations the host exposes over the bridge.

use bridge_core::error::BoxError;
use bridge_core::error::dispatch::DispatchError;
use bridge_core::{Bridge, EventSink, SocketHooks};

use std::time::{Duration, SystemTime};

use humantime::format_rfc3339_millis;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const APP_VERSION: &str = "app.version";
pub const APP_ECHO: &str = "app.echo";
pub const CLOCK_TICKS: &str = "clock.ticks";
pub const ECHO_SOCKET: &str = "echo";

const MIN_TICK_INTERVAL_MS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRequest {
    pub interval_ms: u64,
    /// Stop after this many ticks; unbounded when absent.
    #[serde(default)]
    pub count: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub sequence: u64,
    pub at: String,
}

/// Registers every host operation on `bridge`.
///
/// # Errors
///
/// Returns [`DispatchError::DuplicateRegistration`] if a name is already taken.
pub fn register(bridge: &Bridge) -> Result<(), DispatchError> {
    bridge.handle(APP_VERSION, |_: Value| async {
        Ok::<_, BoxError>(VersionInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    })?;

    bridge.handle(APP_ECHO, |input: Value| async move { Ok::<_, BoxError>(input) })?;

    bridge.provide_subscription(CLOCK_TICKS, clock_ticks)?;

    bridge.provide_socket(ECHO_SOCKET, |_: Value, hooks: SocketHooks| {
        let replies = hooks.clone();
        hooks.on_message(move |message| {
            replies.send(message);
        });
        let id = hooks.id();
        hooks.on_close(move || debug!("Echo socket {id} closed"));
        async { Ok::<(), BoxError>(()) }
    })?;

    Ok(())
}

fn clock_ticks(request: TickRequest, sink: EventSink<Tick>) -> Result<impl FnOnce() + Send + 'static, BoxError> {
    if request.interval_ms < MIN_TICK_INTERVAL_MS {
        return Err(format!("interval_ms must be at least {MIN_TICK_INTERVAL_MS}").into());
    }

    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(request.interval_ms));
        let mut sequence = 0;
        while request.count.is_none_or(|count| sequence < count) {
            interval.tick().await;
            sink.emit(Tick {
                sequence,
                at: format_rfc3339_millis(SystemTime::now()).to_string(),
            });
            sequence += 1;
        }
        sink.complete();
    });

    Ok(move || task.abort())
}
