//! Dispatch of incoming requests to registered operations.
//!
//! A [`Bridge`] is the backend-side registry. Operations are registered under
//! a name for one of three interaction patterns:
//!
//! - [`Bridge::handle`] - unary call, one envelope per request
//! - [`Bridge::provide_subscription`] - server-push event stream
//! - [`Bridge::provide_socket`] - duplex socket over a [`MessagePort`]
//!
//! The transport feeds requests in through [`Bridge::call`],
//! [`Bridge::open_subscription`], [`Bridge::signal`] and
//! [`Bridge::open_socket`]. Nothing a handler does (error, panic, bad input)
//! escapes these entry points as anything other than a value on the wire.
//!
//! [`MessagePort`]: crate::transport::MessagePort

mod socket;
mod subscription;
mod unary;

pub use socket::SocketHooks;
pub use subscription::{EventSink, StreamProducer};

use crate::channel::ChannelKind;
use crate::config::SubscriptionConfig;
use crate::error::dispatch::DispatchError;
use crate::transport::Viewport;

use socket::SocketHandler;
use subscription::SubscriptionHandler;
use unary::UnaryHandler;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use log::{debug, info};

type SignalListener = Box<dyn FnOnce(&Viewport) + Send + 'static>;

struct Registry<H: ?Sized> {
    kind: ChannelKind,
    handlers: RwLock<HashMap<String, Arc<H>>>,
}

impl<H: ?Sized> Registry<H> {
    fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    #[track_caller]
    fn insert(&self, name: &str, handler: Arc<H>) -> Result<(), DispatchError> {
        let channel = crate::channel::channel_for(self.kind, name);
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match handlers.entry(channel) {
            Entry::Occupied(entry) => Err(DispatchError::duplicate(entry.key())),
            Entry::Vacant(entry) => {
                info!("Registered {:?} operation on {}", self.kind, entry.key());
                entry.insert(handler);
                Ok(())
            }
        }
    }

    fn get(&self, channel: &str) -> Option<Arc<H>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .cloned()
    }
}

pub(crate) struct BridgeInner {
    unary: Registry<dyn UnaryHandler>,
    subscriptions: Registry<dyn SubscriptionHandler>,
    sockets: Registry<dyn SocketHandler>,
    signals: Mutex<HashMap<String, SignalListener>>,
    start_timeout: Option<Duration>,
}

/// Backend-side registry and dispatcher. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn new() -> Self {
        Self::with_config(&SubscriptionConfig::default())
    }

    pub fn with_config(config: &SubscriptionConfig) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                unary: Registry::new(ChannelKind::Unary),
                subscriptions: Registry::new(ChannelKind::Subscription),
                sockets: Registry::new(ChannelKind::Socket),
                signals: Mutex::new(HashMap::new()),
                start_timeout: config.start_timeout(),
            }),
        }
    }

    /// Delivers a signal such as `<channel id>:start` to its one-shot listener.
    ///
    /// Returns `false` when nobody listens on `channel`; the signal is dropped.
    pub fn signal(&self, channel: &str, viewport: &Viewport) -> bool {
        let listener = self.signals().remove(channel);
        match listener {
            Some(listener) => {
                listener(viewport);
                true
            }
            None => {
                debug!("Dropping signal {channel} with no listener");
                false
            }
        }
    }

    /// Number of signal listeners still waiting, i.e. pending starts and live stops.
    pub fn pending_signals(&self) -> usize {
        self.signals().len()
    }

    pub(crate) fn once(&self, channel: String, listener: SignalListener) {
        self.signals().insert(channel, listener);
    }

    pub(crate) fn downgrade(&self) -> WeakBridge {
        WeakBridge {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn signals(&self) -> MutexGuard<'_, HashMap<String, SignalListener>> {
        self.inner
            .signals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-owning handle kept by viewport listeners, so a viewport never keeps
/// the registry alive.
#[derive(Clone)]
pub(crate) struct WeakBridge {
    inner: Weak<BridgeInner>,
}

impl WeakBridge {
    pub(crate) fn upgrade(&self) -> Option<Bridge> {
        self.inner.upgrade().map(|inner| Bridge { inner })
    }

    pub(crate) fn remove_signal(&self, channel: &str) -> bool {
        match self.upgrade() {
            Some(bridge) => bridge.signals().remove(channel).is_some(),
            None => false,
        }
    }
}
