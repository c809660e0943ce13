//! Server-push subscriptions.
//!
//! Lifecycle of one invocation:
//!
//! 1. **Pending** - [`Bridge::open_subscription`] allocates a [`ChannelId`]
//!    and returns it; the handler is not invoked yet.
//! 2. **Awaiting start** - a one-shot listener waits on `<id>:start`.
//! 3. **Active** - the start signal binds the invocation to the sender's
//!    viewport and invokes the handler with an [`EventSink`].
//! 4. **Teardown** - the first of viewport destroyed, viewport navigated or
//!    `<id>:stop` marks the binding superseded and stops the producer.
//! 5. **Terminal** - nothing is delivered any more; the id is never reused.

use super::{Bridge, WeakBridge};
use crate::channel::{ChannelId, ChannelKind};
use crate::envelope::{ErrorInfo, SubscriptionEvent};
use crate::error::BoxError;
use crate::error::dispatch::DispatchError;
use crate::protocol::ServerMessage;
use crate::transport::{ListenerId, Viewport};

use std::marker::PhantomData;
use std::mem::take;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Control object returned by a subscription handler.
///
/// `stop` is called at most once, when the subscription is torn down before
/// it completed, and must release whatever the producer holds (timers,
/// watches, tasks). A producer that completed its stream is dropped without
/// `stop`. Any `FnOnce() + Send` closure is a producer.
pub trait StreamProducer: Send + 'static {
    fn stop(self: Box<Self>);
}

impl<F> StreamProducer for F
where
    F: FnOnce() + Send + 'static,
{
    fn stop(self: Box<Self>) {
        (*self)()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    Destroyed,
    Navigated,
    Stopped,
}

#[derive(Default)]
struct BindingState {
    superseded: bool,
    terminated: bool,
    producer: Option<Box<dyn StreamProducer>>,
    listeners: Vec<ListenerId>,
}

/// Association between one channel id, the viewport it pushes into and the
/// producer feeding it.
pub(crate) struct Binding {
    channel: ChannelId,
    viewport: Viewport,
    bridge: WeakBridge,
    state: Mutex<BindingState>,
}

impl Binding {
    fn new(channel: ChannelId, viewport: Viewport, bridge: WeakBridge) -> Self {
        Self {
            channel,
            viewport,
            bridge,
            state: Mutex::new(BindingState::default()),
        }
    }

    /// Pushes one event, or the terminal sentinel when `event` is `None`.
    ///
    /// The sentinel also detaches every teardown trigger: a completed stream
    /// holds no listener and no stop signal.
    fn deliver(&self, event: Option<SubscriptionEvent>) {
        let released = {
            let mut state = self.state();
            if state.superseded {
                debug!(
                    "Trying to send message to changed viewport on {}, dropping",
                    self.channel
                );
                return;
            }
            if state.terminated {
                debug!("Subscription {} already terminated, dropping", self.channel);
                return;
            }
            let terminal = event.is_none();

            // Sent under the lock so a concurrent teardown cannot slip in
            // between the superseded check and the delivery.
            self.viewport.send(ServerMessage::Event {
                channel: self.channel.clone(),
                event,
            });

            if terminal {
                state.terminated = true;
                Some((take(&mut state.listeners), state.producer.take()))
            } else {
                None
            }
        };

        if let Some((listeners, producer)) = released {
            debug!("Subscription {} completed, releasing listeners", self.channel);
            self.release(listeners);
            drop(producer);
        }
    }

    fn release(&self, listeners: Vec<ListenerId>) {
        for id in listeners {
            self.viewport.off(id);
        }
        self.bridge.remove_signal(&self.channel.stop_signal());
    }

    fn is_closed(&self) -> bool {
        let state = self.state();
        state.superseded || state.terminated
    }

    fn is_terminated(&self) -> bool {
        self.state().terminated
    }

    /// Retains the producer, stops it right away if teardown already ran, or
    /// drops it if the stream already completed.
    fn attach(&self, producer: Box<dyn StreamProducer>) {
        let mut state = self.state();
        if state.superseded {
            drop(state);
            debug!("Subscription {} torn down during start", self.channel);
            stop_producer(&self.channel, producer);
            return;
        }
        if state.terminated {
            return;
        }
        state.producer = Some(producer);
    }

    fn track_listener(&self, id: ListenerId) {
        let mut state = self.state();
        if state.superseded || state.terminated {
            drop(state);
            self.viewport.off(id);
            return;
        }
        state.listeners.push(id);
    }

    /// Runs teardown once. Later calls, from any trigger, do nothing.
    fn teardown(&self, trigger: Teardown) -> bool {
        let (producer, listeners) = {
            let mut state = self.state();
            if state.superseded {
                return false;
            }
            state.superseded = true;

            // An explicit stop comes from a live subscriber that still waits
            // for the end of the stream.
            if trigger == Teardown::Stopped && !state.terminated {
                state.terminated = true;
                self.viewport.send(ServerMessage::Event {
                    channel: self.channel.clone(),
                    event: None,
                });
            }

            (state.producer.take(), take(&mut state.listeners))
        };

        info!("Tearing down subscription {} ({trigger:?})", self.channel);
        for id in listeners {
            self.viewport.off(id);
        }
        if let Some(producer) = producer {
            stop_producer(&self.channel, producer);
        }
        true
    }

    fn state(&self) -> MutexGuard<'_, BindingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// A panicking stop must not take the dispatcher down with it.
fn stop_producer(channel: &ChannelId, producer: Box<dyn StreamProducer>) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| producer.stop())) {
        let error = ErrorInfo::from_panic(payload);
        error!("Stopping subscription {channel} panicked: {}", error.message);
    }
}

/// Callback handed to a subscription handler for pushing events.
///
/// Cloneable and thread-safe; producers typically move it into a task.
pub struct EventSink<O> {
    binding: Arc<Binding>,
    _message: PhantomData<fn(O)>,
}

impl<O> Clone for EventSink<O> {
    fn clone(&self) -> Self {
        Self {
            binding: Arc::clone(&self.binding),
            _message: PhantomData,
        }
    }
}

impl<O: Serialize> EventSink<O> {
    /// Pushes one event.
    ///
    /// - `(None, None)` completes the stream: the terminal sentinel is sent
    ///   and nothing is delivered afterwards.
    /// - `(Some(error), _)` sends an error event; a message passed alongside
    ///   an error is discarded.
    /// - `(None, Some(message))` sends a message event.
    ///
    /// After teardown every call is a silent no-op.
    pub fn send(&self, error: Option<ErrorInfo>, message: Option<O>) {
        let event = match (error, message) {
            (None, None) => None,
            (Some(error), message) => {
                if message.is_some() {
                    debug!(
                        "Discarding message sent along with an error on {}",
                        self.binding.channel
                    );
                }
                Some(SubscriptionEvent::error(error))
            }
            (None, Some(message)) => match serde_json::to_value(message) {
                Ok(message) => Some(SubscriptionEvent::message(message)),
                Err(e) => {
                    let error = DispatchError::invalid_output(self.binding.channel.as_str(), e);
                    Some(SubscriptionEvent::error(error.into()))
                }
            },
        };
        self.binding.deliver(event);
    }

    pub fn emit(&self, message: O) {
        self.send(None, Some(message));
    }

    pub fn fail(&self, error: impl Into<BoxError>) {
        let error: BoxError = error.into();
        self.send(Some(ErrorInfo::from(&error)), None);
    }

    pub fn complete(&self) {
        self.send(None, None);
    }

    /// `true` once the stream completed or was torn down. Producers may use
    /// this to stop work early; sending anyway is harmless.
    pub fn is_closed(&self) -> bool {
        self.binding.is_closed()
    }

    pub fn channel(&self) -> &ChannelId {
        &self.binding.channel
    }
}

pub(crate) trait SubscriptionHandler: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn start(&self, input: Value, binding: Arc<Binding>)
    -> Result<Box<dyn StreamProducer>, ErrorInfo>;
}

struct TypedSubscription<F, I, O, P, E> {
    name: String,
    handler: F,
    _phantom: PhantomData<fn(I, O) -> (P, E)>,
}

impl<F, I, O, P, E> SubscriptionHandler for TypedSubscription<F, I, O, P, E>
where
    F: Fn(I, EventSink<O>) -> Result<P, E> + Send + Sync + 'static,
    I: DeserializeOwned + 'static,
    O: Serialize + 'static,
    P: StreamProducer,
    E: Into<BoxError> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn start(
        &self,
        input: Value,
        binding: Arc<Binding>,
    ) -> Result<Box<dyn StreamProducer>, ErrorInfo> {
        let input: I = serde_json::from_value(input)
            .map_err(|e| ErrorInfo::from(DispatchError::invalid_input(&self.name, e)))?;
        let sink = EventSink {
            binding,
            _message: PhantomData,
        };

        match (self.handler)(input, sink) {
            Ok(producer) => Ok(Box::new(producer)),
            Err(error) => {
                let error: BoxError = error.into();
                Err(ErrorInfo::from(&error))
            }
        }
    }
}

impl Bridge {
    /// Registers a subscription operation under `name`.
    ///
    /// The handler is invoked once the subscriber sends its start signal. It
    /// receives the decoded input and an [`EventSink`], and returns the
    /// [`StreamProducer`] that teardown will stop. A handler that fails (or
    /// panics) instead produces one error event followed by the terminal
    /// sentinel.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::DuplicateRegistration`] if `name` is taken.
    #[track_caller]
    pub fn provide_subscription<F, I, O, P, E>(
        &self,
        name: &str,
        handler: F,
    ) -> Result<(), DispatchError>
    where
        F: Fn(I, EventSink<O>) -> Result<P, E> + Send + Sync + 'static,
        I: DeserializeOwned + 'static,
        O: Serialize + 'static,
        P: StreamProducer,
        E: Into<BoxError> + 'static,
    {
        let handler = TypedSubscription {
            name: name.to_string(),
            handler,
            _phantom: PhantomData,
        };
        self.inner.subscriptions.insert(name, Arc::new(handler))
    }

    /// Opens a new invocation of the subscription registered on `channel`.
    ///
    /// Returns the per-invocation channel id. The caller must then send
    /// `<id>:start` through [`Bridge::signal`] to begin receiving events and
    /// may send `<id>:stop` to cancel.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownOperation`] if nothing is registered.
    pub fn open_subscription(&self, channel: &str, input: Value) -> Result<ChannelId, DispatchError> {
        let handler = self
            .inner
            .subscriptions
            .get(channel)
            .ok_or_else(|| DispatchError::unknown_operation(channel))?;

        let id = ChannelId::next(ChannelKind::Subscription, handler.name());
        let start_signal = id.start_signal();
        debug!("Opened subscription {id}, awaiting start");

        let bridge = self.downgrade();
        let channel_id = id.clone();
        self.once(
            start_signal.clone(),
            Box::new(move |viewport: &Viewport| {
                start(bridge, handler, channel_id, input, viewport.clone());
            }),
        );

        if let Some(timeout) = self.inner.start_timeout {
            expire_pending_start(self.downgrade(), start_signal, timeout);
        }

        Ok(id)
    }
}

fn expire_pending_start(bridge: WeakBridge, start_signal: String, timeout: std::time::Duration) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                if bridge.remove_signal(&start_signal) {
                    warn!("No start signal on {start_signal} within {timeout:?}, discarding");
                }
            });
        }
        Err(_) => {
            warn!("No async runtime, start timeout for {start_signal} not armed");
        }
    }
}

fn start(
    bridge: WeakBridge,
    handler: Arc<dyn SubscriptionHandler>,
    channel: ChannelId,
    input: Value,
    viewport: Viewport,
) {
    info!("Starting subscription {channel} for viewport {}", viewport.id());
    let binding = Arc::new(Binding::new(channel.clone(), viewport.clone(), bridge.clone()));

    let started = catch_unwind(AssertUnwindSafe(|| {
        handler.start(input, Arc::clone(&binding))
    }))
    .unwrap_or_else(|payload| Err(ErrorInfo::from_panic(payload)));

    let producer: Box<dyn StreamProducer> = match started {
        Ok(producer) => producer,
        Err(error) => {
            warn!("Subscription {channel} failed to start: {}", error.message);
            binding.deliver(Some(SubscriptionEvent::error(error)));
            binding.deliver(None);
            // Nothing was produced, so there is nothing to stop.
            Box::new(|| {})
        }
    };

    // The stop listener goes first: if the viewport is already gone, the
    // teardown below must be able to remove it again.
    let stop_signal = channel.stop_signal();
    if let Some(bridge) = bridge.upgrade() {
        let stop_binding = Arc::clone(&binding);
        bridge.once(
            stop_signal.clone(),
            Box::new(move |_: &Viewport| {
                stop_binding.teardown(Teardown::Stopped);
            }),
        );
        // The stream may have completed while the handler was starting.
        if binding.is_terminated() {
            bridge.signals().remove(&stop_signal);
        }
    }

    for trigger in [Teardown::Destroyed, Teardown::Navigated] {
        let listener_binding = Arc::clone(&binding);
        let listener_bridge = bridge.clone();
        let listener_stop_signal = stop_signal.clone();
        let on_teardown = move || {
            if listener_binding.teardown(trigger) {
                listener_bridge.remove_signal(&listener_stop_signal);
            }
        };
        let id = match trigger {
            Teardown::Destroyed => viewport.on_destroyed(on_teardown),
            _ => viewport.on_navigated(on_teardown),
        };
        binding.track_listener(id);
    }

    binding.attach(producer);
}
