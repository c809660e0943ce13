use crate::channel::{ChannelId, ChannelKind, channel_for};
use crate::config::SubscriptionConfig;
use crate::dispatch::{Bridge, EventSink};
use crate::envelope::{ErrorInfo, SubscriptionEvent};
use crate::error::BoxError;
use crate::protocol::ServerMessage;
use crate::tests::drain;
use crate::transport::Viewport;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

struct Counter {
    bridge: Bridge,
    sinks: Arc<Mutex<Vec<EventSink<u32>>>>,
    stops: Arc<AtomicUsize>,
}

impl Counter {
    fn register(bridge: Bridge) -> Self {
        let sinks: Arc<Mutex<Vec<EventSink<u32>>>> = Arc::default();
        let stops = Arc::new(AtomicUsize::new(0));
        let handler_sinks = Arc::clone(&sinks);
        let handler_stops = Arc::clone(&stops);
        bridge
            .provide_subscription("counter", move |_: Value, sink: EventSink<u32>| {
                handler_sinks.lock().unwrap().push(sink);
                let stops = Arc::clone(&handler_stops);
                Ok::<_, BoxError>(move || {
                    stops.fetch_add(1, Ordering::SeqCst);
                })
            })
            .unwrap();
        Self { bridge, sinks, stops }
    }

    fn open(&self) -> ChannelId {
        self.bridge
            .open_subscription(&channel_for(ChannelKind::Subscription, "counter"), Value::Null)
            .expect("counter is registered")
    }

    fn start(&self, id: &ChannelId, viewport: &Viewport) -> EventSink<u32> {
        assert!(self.bridge.signal(&id.start_signal(), viewport));
        self.sinks.lock().unwrap().last().cloned().expect("handler should have run")
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

fn events(messages: Vec<ServerMessage>) -> Vec<(ChannelId, Option<SubscriptionEvent>)> {
    messages
        .into_iter()
        .map(|message| match message {
            ServerMessage::Event { channel, event } => (channel, event),
            other => panic!("Expected an event, got {other:?}"),
        })
        .collect()
}

/// **VALUE**: Verifies the handler does not run before the start signal.
///
/// **WHY THIS MATTERS**: Events produced before the subscriber listens would be lost;
/// splitting "channel id" from "start" prevents that race.
///
/// **BUG THIS CATCHES**: Would catch `open_subscription` invoking the handler eagerly.
#[test]
fn given_opened_subscription_when_not_started_then_handler_not_invoked() {
    let counter = Counter::register(Bridge::new());

    let id = counter.open();

    assert!(counter.sinks.lock().unwrap().is_empty());
    assert_eq!(counter.bridge.pending_signals(), 1, "Start listener should wait");
    assert!(id.as_str().starts_with("ipc:subscribe:counter:"));
}

/// **VALUE**: Verifies the scenario "three messages, then the viewport is destroyed".
///
/// **WHY THIS MATTERS**: Closing a window without unsubscribing must release the
/// producer exactly once and never deliver anything afterwards.
///
/// **BUG THIS CATCHES**: Would catch a leaked producer, a double stop, a late delivery,
/// or a stop listener left behind in the signal table.
#[test]
fn given_three_messages_when_viewport_destroyed_then_stopped_once_and_late_sends_dropped() {
    // GIVEN: A started subscription that delivered three messages
    let counter = Counter::register(Bridge::new());
    let (viewport, mut outbox) = Viewport::new();
    let id = counter.open();
    let sink = counter.start(&id, &viewport);
    for n in 1..=3 {
        sink.emit(n);
    }
    let delivered = events(drain(&mut outbox));
    assert_eq!(delivered.len(), 3);
    for (n, (channel, event)) in (1..=3).zip(delivered) {
        assert_eq!(channel, id);
        assert_eq!(event, Some(SubscriptionEvent::message(json!(n))));
    }

    // WHEN: The viewport is destroyed, then the producer keeps sending
    viewport.destroy();
    sink.emit(4);
    sink.complete();

    // THEN: Stopped once, nothing delivered, no listeners left
    assert_eq!(counter.stops(), 1);
    assert!(sink.is_closed());
    assert!(drain(&mut outbox).is_empty());
    assert_eq!(counter.bridge.pending_signals(), 0);
    assert!(!counter.bridge.signal(&id.stop_signal(), &viewport));
    assert_eq!(counter.stops(), 1);
}

/// **VALUE**: Verifies the scenario "handler fails synchronously on start".
///
/// **WHY THIS MATTERS**: The subscriber must learn why the stream is empty, and the
/// stream must still end.
///
/// **BUG THIS CATCHES**: Would catch a missing terminal sentinel after the error event,
/// or a second sentinel on a later stop.
#[test]
fn given_handler_failing_on_start_when_started_then_error_then_terminal() {
    let bridge = Bridge::new();
    bridge
        .provide_subscription("broken", |_: Value, _: EventSink<u32>| {
            Err::<fn(), _>("watch unavailable")
        })
        .unwrap();
    let (viewport, mut outbox) = Viewport::new();
    let id = bridge
        .open_subscription(&channel_for(ChannelKind::Subscription, "broken"), Value::Null)
        .unwrap();

    bridge.signal(&id.start_signal(), &viewport);
    bridge.signal(&id.stop_signal(), &viewport);

    let delivered = events(drain(&mut outbox));
    assert_eq!(delivered.len(), 2, "One error event, one sentinel: {delivered:?}");
    assert_eq!(
        delivered[0].1,
        Some(SubscriptionEvent::error(ErrorInfo::new("watch unavailable")))
    );
    assert_eq!(delivered[1].1, None);
}

/// **VALUE**: Verifies a panicking start and undecodable input behave like a failure.
///
/// **BUG THIS CATCHES**: Would catch a panic escaping `Bridge::signal` into the
/// connection task.
#[test]
fn given_panicking_or_bad_input_start_when_started_then_error_then_terminal() {
    let bridge = Bridge::new();
    bridge
        .provide_subscription("explodes", |_: u32, _: EventSink<u32>| -> Result<fn(), BoxError> {
            panic!("no watcher")
        })
        .unwrap();
    let (viewport, mut outbox) = Viewport::new();
    let channel = channel_for(ChannelKind::Subscription, "explodes");

    let panicking = bridge.open_subscription(&channel, json!(1)).unwrap();
    let bad_input = bridge.open_subscription(&channel, json!("one")).unwrap();
    bridge.signal(&panicking.start_signal(), &viewport);
    bridge.signal(&bad_input.start_signal(), &viewport);

    let delivered = events(drain(&mut outbox));
    assert_eq!(delivered.len(), 4);
    let panic_error = delivered[0].1.as_ref().and_then(|event| event.error.as_ref()).unwrap();
    assert_eq!(panic_error.kind.as_deref(), Some("panic"));
    assert_eq!(delivered[1], (panicking, None));
    let input_error = delivered[2].1.as_ref().and_then(|event| event.error.as_ref()).unwrap();
    assert_eq!(input_error.kind.as_deref(), Some("dispatch"));
    assert_eq!(delivered[3], (bad_input, None));
}

/// **VALUE**: Verifies producer completion sends one sentinel and ends delivery.
///
/// **WHY THIS MATTERS**: The sentinel is the last event on a channel, always.
///
/// **BUG THIS CATCHES**: Would catch sends after `complete` being delivered, or a
/// second sentinel when the subscriber stops a completed stream.
#[test]
fn given_completed_stream_when_sending_and_stopping_then_single_sentinel() {
    let counter = Counter::register(Bridge::new());
    let (viewport, mut outbox) = Viewport::new();
    let id = counter.open();
    let sink = counter.start(&id, &viewport);

    sink.emit(1);
    sink.send(None, None);
    sink.emit(2);
    let stop_heard = counter.bridge.signal(&id.stop_signal(), &viewport);
    viewport.destroy();

    let delivered = events(drain(&mut outbox));
    assert_eq!(
        delivered.into_iter().map(|(_, event)| event).collect::<Vec<_>>(),
        vec![Some(SubscriptionEvent::message(json!(1))), None]
    );
    assert!(!stop_heard, "A completed stream no longer listens for stop");
    assert_eq!(counter.stops(), 0, "A completed producer is dropped, not stopped");
}

/// **VALUE**: Verifies completed and failed subscriptions leave nothing behind on a
/// long-lived viewport.
///
/// **WHY THIS MATTERS**: A UI window stays open for hours and runs many short
/// subscriptions; each one must release its stop listener when it ends.
///
/// **BUG THIS CATCHES**: Would catch the stop signal or the viewport listeners
/// of a finished stream staying registered until the connection closes.
#[test]
fn given_many_finished_subscriptions_when_viewport_stays_alive_then_no_listeners_left() {
    // GIVEN: One live viewport and two operations, one completing and one failing
    let counter = Counter::register(Bridge::new());
    counter
        .bridge
        .provide_subscription("broken", |_: Value, _: EventSink<u32>| {
            Err::<fn(), _>("watch unavailable")
        })
        .unwrap();
    let (viewport, mut outbox) = Viewport::new();

    // WHEN: Running many subscriptions to completion, and a few failing starts
    for n in 0..100 {
        let id = counter.open();
        let sink = counter.start(&id, &viewport);
        sink.emit(n);
        sink.complete();
    }
    for _ in 0..3 {
        let id = counter
            .bridge
            .open_subscription(&channel_for(ChannelKind::Subscription, "broken"), Value::Null)
            .unwrap();
        counter.bridge.signal(&id.start_signal(), &viewport);
    }

    // THEN: No signal or viewport listener is left, and a later teardown stops nothing
    assert_eq!(counter.bridge.pending_signals(), 0);
    assert_eq!(viewport.listener_count(), 0);
    assert_eq!(events(drain(&mut outbox)).len(), 206);
    viewport.navigate();
    viewport.destroy();
    assert_eq!(counter.stops(), 0);
}

/// **VALUE**: Verifies a stream completed from inside the handler is released too.
///
/// **BUG THIS CATCHES**: Would catch the stop listener registered after the handler
/// returned surviving a completion that happened during start.
#[test]
fn given_handler_completing_during_start_when_started_then_no_listeners_left() {
    let bridge = Bridge::new();
    bridge
        .provide_subscription("once", |_: Value, sink: EventSink<u32>| {
            sink.emit(1);
            sink.complete();
            Ok::<_, BoxError>(|| {})
        })
        .unwrap();
    let (viewport, mut outbox) = Viewport::new();
    let id = bridge
        .open_subscription(&channel_for(ChannelKind::Subscription, "once"), Value::Null)
        .unwrap();

    bridge.signal(&id.start_signal(), &viewport);

    assert_eq!(bridge.pending_signals(), 0);
    assert_eq!(viewport.listener_count(), 0);
    assert_eq!(
        events(drain(&mut outbox)),
        vec![(id.clone(), Some(SubscriptionEvent::message(json!(1)))), (id, None)]
    );
}

/// **VALUE**: Verifies an explicit stop ends the stream and is idempotent.
///
/// **WHY THIS MATTERS**: A stopped producer must not be stopped again by a later
/// window close, and the subscriber needs the sentinel to finish iterating.
///
/// **BUG THIS CATCHES**: Would catch viewport listeners left attached after a stop.
#[test]
fn given_active_subscription_when_stopped_twice_then_one_stop_one_sentinel() {
    let counter = Counter::register(Bridge::new());
    let (viewport, mut outbox) = Viewport::new();
    let id = counter.open();
    let sink = counter.start(&id, &viewport);

    assert!(counter.bridge.signal(&id.stop_signal(), &viewport));
    assert!(!counter.bridge.signal(&id.stop_signal(), &viewport));
    viewport.navigate();
    viewport.destroy();
    sink.emit(9);

    assert_eq!(counter.stops(), 1);
    assert_eq!(events(drain(&mut outbox)), vec![(id, None)]);
}

/// **VALUE**: Verifies navigation tears the subscription down like destruction.
///
/// **WHY THIS MATTERS**: A page reload keeps the viewport but drops every listener on
/// the UI side; events would go nowhere.
///
/// **BUG THIS CATCHES**: Would catch navigation not being a teardown trigger, or the
/// stop listener being left in the signal table.
#[test]
fn given_active_subscription_when_viewport_navigates_then_torn_down() {
    let counter = Counter::register(Bridge::new());
    let (viewport, mut outbox) = Viewport::new();
    let id = counter.open();
    let sink = counter.start(&id, &viewport);

    viewport.navigate();
    sink.emit(1);

    assert_eq!(counter.stops(), 1);
    assert!(drain(&mut outbox).is_empty());
    assert_eq!(counter.bridge.pending_signals(), 0);
    assert!(!viewport.is_destroyed(), "Navigation keeps the viewport alive");
}

/// **VALUE**: Verifies the scenario "two concurrent subscriptions to one operation".
///
/// **WHY THIS MATTERS**: Each invocation owns its channel; ending one must not end
/// the other.
///
/// **BUG THIS CATCHES**: Would catch shared channel ids or a shared terminated flag.
#[test]
fn given_two_subscriptions_when_each_completes_then_independent_channels_and_sentinels() {
    let counter = Counter::register(Bridge::new());
    let (viewport, mut outbox) = Viewport::new();
    let first_id = counter.open();
    let second_id = counter.open();
    assert_ne!(first_id, second_id);

    let first = counter.start(&first_id, &viewport);
    let second = counter.start(&second_id, &viewport);
    first.emit(1);
    second.emit(2);
    first.complete();
    second.emit(3);
    second.complete();

    let delivered = events(drain(&mut outbox));
    let on = |id: &ChannelId| -> Vec<Option<SubscriptionEvent>> {
        delivered
            .iter()
            .filter(|(channel, _)| channel == id)
            .map(|(_, event)| event.clone())
            .collect()
    };
    assert_eq!(on(&first_id), vec![Some(SubscriptionEvent::message(json!(1))), None]);
    assert_eq!(
        on(&second_id),
        vec![
            Some(SubscriptionEvent::message(json!(2))),
            Some(SubscriptionEvent::message(json!(3))),
            None
        ]
    );
}

/// **VALUE**: Verifies an error passed together with a message wins.
///
/// **WHY THIS MATTERS**: Events carry either an error or a message, never both.
///
/// **BUG THIS CATCHES**: Would catch both fields being forwarded.
#[test]
fn given_error_and_message_when_sent_then_only_error_delivered() {
    let counter = Counter::register(Bridge::new());
    let (viewport, mut outbox) = Viewport::new();
    let id = counter.open();
    let sink = counter.start(&id, &viewport);

    sink.send(Some(ErrorInfo::new("partial read")), Some(7));
    sink.fail("disk gone");

    let delivered = events(drain(&mut outbox));
    assert_eq!(
        delivered.into_iter().map(|(_, event)| event).collect::<Vec<_>>(),
        vec![
            Some(SubscriptionEvent::error(ErrorInfo::new("partial read"))),
            Some(SubscriptionEvent::error(ErrorInfo::new("disk gone"))),
        ]
    );
}

/// **VALUE**: Verifies a subscription started from a dead viewport is released at once.
///
/// **WHY THIS MATTERS**: The start signal can race with the window closing.
///
/// **BUG THIS CATCHES**: Would catch a producer attached to an already destroyed
/// viewport and never stopped.
#[test]
fn given_destroyed_viewport_when_started_then_producer_stopped_immediately() {
    let counter = Counter::register(Bridge::new());
    let (viewport, mut outbox) = Viewport::new();
    viewport.destroy();
    let id = counter.open();

    let sink = counter.start(&id, &viewport);
    sink.emit(1);

    assert_eq!(counter.stops(), 1);
    assert!(drain(&mut outbox).is_empty());
    assert_eq!(counter.bridge.pending_signals(), 0);
}

/// **VALUE**: Verifies an unstarted subscription is discarded after the start timeout.
///
/// **WHY THIS MATTERS**: A subscriber that never sends start would otherwise pin the
/// pending invocation forever.
///
/// **BUG THIS CATCHES**: Would catch the timeout not being armed, or a late start
/// still invoking the handler.
#[tokio::test]
async fn given_start_timeout_when_start_never_arrives_then_discarded() {
    let config = SubscriptionConfig {
        start_timeout_ms: Some(20),
    };
    let counter = Counter::register(Bridge::with_config(&config));
    let (viewport, _outbox) = Viewport::new();
    let id = counter.open();

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(counter.bridge.pending_signals(), 0);
    assert!(!counter.bridge.signal(&id.start_signal(), &viewport));
    assert!(counter.sinks.lock().unwrap().is_empty());
}
