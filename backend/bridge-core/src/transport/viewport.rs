//! The display context a subscription or socket is bound to.
//!
//! The bridge never owns a viewport. It only pushes messages into it and
//! listens for its destruction or navigation, which are cancellation sources
//! triggered from outside (window closed, page reloaded, connection lost).

use crate::protocol::ServerMessage;

use std::fmt::{Display, Formatter, Result as FormatResult};
use std::mem::take;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use uuid::Uuid;

type Listener = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewportId(Uuid);

impl Display for ViewportId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> FormatResult {
        write!(formatter, "{}", self.0)
    }
}

/// Handle returned by listener registration, used to detach it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone, Copy, PartialEq, Eq)]
enum LifecycleEvent {
    Destroyed,
    Navigated,
}

#[derive(Default)]
struct Lifecycle {
    destroyed: bool,
    listeners: Vec<(ListenerId, LifecycleEvent, Listener)>,
}

struct ViewportInner {
    id: ViewportId,
    outbox: UnboundedSender<ServerMessage>,
    lifecycle: Mutex<Lifecycle>,
    next_listener: AtomicU64,
}

/// Shared handle to one viewport. Clones refer to the same viewport.
#[derive(Clone)]
pub struct Viewport {
    inner: Arc<ViewportInner>,
}

impl Viewport {
    /// Creates a viewport and the receiving end of its outbox.
    ///
    /// Whoever holds the receiver is the transport that actually delivers
    /// messages to the UI process.
    pub fn new() -> (Self, UnboundedReceiver<ServerMessage>) {
        let (outbox, receiver) = unbounded_channel();
        let viewport = Self {
            inner: Arc::new(ViewportInner {
                id: ViewportId(Uuid::new_v4()),
                outbox,
                lifecycle: Mutex::new(Lifecycle::default()),
                next_listener: AtomicU64::new(0),
            }),
        };
        (viewport, receiver)
    }

    pub fn id(&self) -> ViewportId {
        self.inner.id
    }

    /// Pushes a message into the viewport.
    ///
    /// Returns `false` if the viewport is destroyed or its transport is gone;
    /// the message is dropped in that case.
    pub fn send(&self, message: ServerMessage) -> bool {
        if self.is_destroyed() {
            trace!("Viewport {} destroyed, dropping outbound message", self.id());
            return false;
        }
        self.inner.outbox.send(message).is_ok()
    }

    pub fn is_destroyed(&self) -> bool {
        self.lifecycle().destroyed
    }

    /// Registers a one-shot listener for destruction.
    ///
    /// On an already destroyed viewport the listener runs immediately.
    pub fn on_destroyed(&self, listener: impl FnOnce() + Send + 'static) -> ListenerId {
        self.register(LifecycleEvent::Destroyed, Box::new(listener))
    }

    /// Registers a one-shot listener for navigation.
    ///
    /// A destroyed viewport never navigates; the listener is discarded.
    pub fn on_navigated(&self, listener: impl FnOnce() + Send + 'static) -> ListenerId {
        self.register(LifecycleEvent::Navigated, Box::new(listener))
    }

    /// Detaches a listener. Unknown or already fired ids are ignored.
    pub fn off(&self, id: ListenerId) {
        self.lifecycle()
            .listeners
            .retain(|(listener_id, _, _)| *listener_id != id);
    }

    /// Signals that the viewport navigated away. Fires navigation listeners once.
    pub fn navigate(&self) {
        let fired = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.destroyed {
                return;
            }
            let (fired, kept): (Vec<_>, Vec<_>) = take(&mut lifecycle.listeners)
                .into_iter()
                .partition(|(_, event, _)| *event == LifecycleEvent::Navigated);
            lifecycle.listeners = kept;
            fired
        };

        debug!("Viewport {} navigated", self.id());
        run_listeners(fired);
    }

    /// Destroys the viewport. Idempotent; destruction listeners fire once.
    pub fn destroy(&self) {
        let listeners = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.destroyed {
                return;
            }
            lifecycle.destroyed = true;
            take(&mut lifecycle.listeners)
        };

        debug!("Viewport {} destroyed", self.id());
        let fired = listeners
            .into_iter()
            .filter(|(_, event, _)| *event == LifecycleEvent::Destroyed)
            .collect();
        run_listeners(fired);
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self) -> usize {
        self.lifecycle().listeners.len()
    }

    fn register(&self, event: LifecycleEvent, listener: Listener) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        let mut lifecycle = self.lifecycle();

        if lifecycle.destroyed {
            drop(lifecycle);
            if event == LifecycleEvent::Destroyed {
                listener();
            }
            return id;
        }

        lifecycle.listeners.push((id, event, listener));
        id
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

// Listeners run outside the lock: they usually call back into the viewport.
fn run_listeners(listeners: Vec<(ListenerId, LifecycleEvent, Listener)>) {
    for (_, _, listener) in listeners {
        listener();
    }
}
