//! Duplex sockets.
//!
//! Each invocation gets a [`SocketHooks`] wrapping one end of a
//! [`MessagePort`] pair. The port closes exactly once, whichever of these
//! comes first: the handler calls `close`, the remote end closes, the
//! originating viewport is destroyed or navigates, or setup fails.
//!
//! Setup completion is announced with a `Ready` control frame; a failed setup
//! sends `ReadyError` and closes. Application frames sent during setup are
//! held back until `Ready` went out.

use super::Bridge;
use crate::channel::next_sequence;
use crate::envelope::ErrorInfo;
use crate::error::BoxError;
use crate::error::dispatch::DispatchError;
use crate::transport::{ListenerId, MessagePort, PortFrame, SocketMessage, Viewport};

use std::future::Future;
use std::marker::PhantomData;
use std::mem::take;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde_json::Value;

type MessageListener = Arc<dyn Fn(SocketMessage) + Send + Sync + 'static>;
type CloseListener = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct SocketState {
    is_closed: bool,
    ready: bool,
    pending: Vec<SocketMessage>,
    pumping: bool,
    message_listeners: Vec<MessageListener>,
    close_listeners: Vec<CloseListener>,
    close_fired: bool,
    viewport_listeners: Vec<ListenerId>,
}

struct SocketInner {
    id: u64,
    port: MessagePort,
    viewport: Viewport,
    state: Mutex<SocketState>,
}

/// Duplex channel handed to a socket handler.
#[derive(Clone)]
pub struct SocketHooks {
    inner: Arc<SocketInner>,
}

impl SocketHooks {
    fn new(id: u64, port: MessagePort, viewport: Viewport) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                id,
                port,
                viewport,
                state: Mutex::new(SocketState::default()),
            }),
        }
    }

    /// Diagnostic identifier of this socket.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed
    }

    /// Registers a listener for inbound application messages.
    ///
    /// Delivery starts with the first registration; frames that arrived
    /// earlier are queued, not lost.
    pub fn on_message(&self, listener: impl Fn(SocketMessage) + Send + Sync + 'static) {
        let start_pump = {
            let mut state = self.state();
            state.message_listeners.push(Arc::new(listener));
            !take_flag(&mut state.pumping)
        };
        if start_pump {
            tokio::spawn(pump_messages(self.clone()));
        }
    }

    /// Registers a listener that runs once when the socket closes.
    ///
    /// On an already closed socket the listener runs immediately.
    pub fn on_close(&self, listener: impl FnOnce() + Send + 'static) {
        let mut state = self.state();
        if state.close_fired {
            drop(state);
            listener();
            return;
        }
        state.close_listeners.push(Box::new(listener));
    }

    /// Sends an application message. Dropped once the socket is closed.
    pub fn send(&self, message: impl Into<SocketMessage>) -> bool {
        let message = message.into();
        let mut state = self.state();
        if state.is_closed {
            debug!("Socket {} closed, dropping outbound message", self.id());
            return false;
        }
        if !state.ready {
            state.pending.push(message);
            return true;
        }
        self.inner.port.post(PortFrame::Data(message))
    }

    /// Asks the remote side to close, then closes the port. Idempotent.
    pub fn close(&self) {
        if self.is_closed() {
            return;
        }
        self.inner.port.post(PortFrame::Closing);
        self.close_port();
    }

    fn close_port(&self) {
        let listeners = {
            let mut state = self.state();
            if take_flag(&mut state.is_closed) {
                return;
            }
            state.pending.clear();
            take(&mut state.viewport_listeners)
        };

        info!("Closing socket port {}", self.id());
        self.inner.port.close();
        for id in listeners {
            self.inner.viewport.off(id);
        }
    }

    /// Sends `Ready`, then whatever the handler sent during setup.
    fn mark_ready(&self) {
        let mut state = self.state();
        if state.is_closed {
            return;
        }
        self.inner.port.post(PortFrame::Ready);
        for message in take(&mut state.pending) {
            self.inner.port.post(PortFrame::Data(message));
        }
        state.ready = true;
    }

    fn fail_setup(&self, error: ErrorInfo) {
        {
            let mut state = self.state();
            state.pending.clear();
        }
        self.inner.port.post(PortFrame::ReadyError(error));
        self.close_port();
    }

    fn fire_close(&self) {
        let listeners = {
            let mut state = self.state();
            if take_flag(&mut state.close_fired) {
                return;
            }
            state.is_closed = true;
            // Listeners often hold a clone of these hooks.
            state.message_listeners.clear();
            take(&mut state.close_listeners)
        };

        debug!("Socket {} closed", self.id());
        for listener in listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(listener)) {
                let error = ErrorInfo::from_panic(payload);
                error!("Close listener of socket {} panicked: {}", self.id(), error.message);
            }
        }
    }

    fn track_viewport_listener(&self, id: ListenerId) {
        let mut state = self.state();
        if state.is_closed {
            drop(state);
            self.inner.viewport.off(id);
            return;
        }
        state.viewport_listeners.push(id);
    }

    fn state(&self) -> MutexGuard<'_, SocketState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sets `flag` and reports whether it was already set.
fn take_flag(flag: &mut bool) -> bool {
    std::mem::replace(flag, true)
}

async fn pump_messages(hooks: SocketHooks) {
    while let Some(frame) = hooks.inner.port.recv().await {
        match frame {
            PortFrame::Data(message) => {
                let listeners = hooks.state().message_listeners.clone();
                for listener in listeners {
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(message.clone()))) {
                        let error = ErrorInfo::from_panic(payload);
                        error!("Message listener of socket {} panicked: {}", hooks.id(), error.message);
                    }
                }
            }
            PortFrame::Closing => {
                debug!("Socket {} remote requested close", hooks.id());
                hooks.close_port();
                break;
            }
            PortFrame::Ready | PortFrame::ReadyError(_) => {
                warn!("Socket {} received a setup frame from the caller, ignoring", hooks.id());
            }
        }
    }
}

async fn watch_close(hooks: SocketHooks) {
    hooks.inner.port.closed().await;
    hooks.close_port();
    hooks.fire_close();
}

pub(crate) trait SocketHandler: Send + Sync + 'static {
    fn open(&self, input: Value, hooks: SocketHooks) -> BoxFuture<'static, Result<(), ErrorInfo>>;
}

struct TypedSocket<F, I, E, Fut> {
    name: String,
    handler: F,
    _phantom: PhantomData<fn(I) -> (E, Fut)>,
}

impl<F, I, E, Fut> SocketHandler for TypedSocket<F, I, E, Fut>
where
    F: Fn(I, SocketHooks) -> Fut + Send + Sync + 'static,
    I: DeserializeOwned + Send + 'static,
    E: Into<BoxError> + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    fn open(&self, input: Value, hooks: SocketHooks) -> BoxFuture<'static, Result<(), ErrorInfo>> {
        let input: I = match serde_json::from_value(input) {
            Ok(input) => input,
            Err(e) => {
                let error = DispatchError::invalid_input(&self.name, e);
                return Box::pin(async move { Err(ErrorInfo::from(error)) });
            }
        };

        let future = match catch_unwind(AssertUnwindSafe(|| (self.handler)(input, hooks))) {
            Ok(future) => future,
            Err(payload) => {
                let error = ErrorInfo::from_panic(payload);
                return Box::pin(async move { Err(error) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(future).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(error)) => {
                    let error: BoxError = error.into();
                    Err(ErrorInfo::from(&error))
                }
                Err(payload) => Err(ErrorInfo::from_panic(payload)),
            }
        })
    }
}

impl Bridge {
    /// Registers a socket operation under `name`.
    ///
    /// The handler receives the decoded input and the [`SocketHooks`] of the
    /// new socket; its future resolving marks the end of setup.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DuplicateRegistration`] if `name` is taken.
    #[track_caller]
    pub fn provide_socket<F, I, E, Fut>(&self, name: &str, handler: F) -> Result<(), DispatchError>
    where
        F: Fn(I, SocketHooks) -> Fut + Send + Sync + 'static,
        I: DeserializeOwned + Send + 'static,
        E: Into<BoxError> + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
    {
        let handler = TypedSocket {
            name: name.to_string(),
            handler,
            _phantom: PhantomData,
        };
        self.inner.sockets.insert(name, Arc::new(handler))
    }

    /// Runs one socket invocation on `port`, bound to `viewport`.
    ///
    /// Resolves when setup finished (successfully or not); the socket itself
    /// lives on until it is closed.
    pub async fn open_socket(&self, channel: &str, input: Value, port: MessagePort, viewport: Viewport) {
        let id = next_sequence();
        info!("Opening socket port {id} on {channel}");
        let hooks = SocketHooks::new(id, port, viewport.clone());

        let Some(handler) = self.inner.sockets.get(channel) else {
            warn!("Socket requested on unregistered channel {channel}");
            hooks.fail_setup(DispatchError::unknown_operation(channel).into());
            hooks.fire_close();
            return;
        };
        tokio::spawn(watch_close(hooks.clone()));

        for teardown in [Teardown::Destroyed, Teardown::Navigated] {
            let listener_hooks = hooks.clone();
            let close = move || listener_hooks.close_port();
            let listener = match teardown {
                Teardown::Destroyed => viewport.on_destroyed(close),
                Teardown::Navigated => viewport.on_navigated(close),
            };
            hooks.track_viewport_listener(listener);
        }

        match handler.open(input, hooks.clone()).await {
            Ok(()) => {
                info!("Opened socket handler {id}");
                hooks.mark_ready();
            }
            Err(error) => {
                error!("Error opening socket handler {id}: {}", error.message);
                hooks.fail_setup(error);
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Teardown {
    Destroyed,
    Navigated,
}
