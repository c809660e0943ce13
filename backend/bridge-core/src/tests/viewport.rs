use crate::protocol::ServerMessage;
use crate::tests::drain;
use crate::transport::Viewport;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
    let count = Arc::new(AtomicUsize::new(0));
    let read = Arc::clone(&count);
    (count, move || read.load(Ordering::SeqCst))
}

fn bump(count: &Arc<AtomicUsize>) -> impl FnOnce() + Send + 'static {
    let count = Arc::clone(count);
    move || {
        count.fetch_add(1, Ordering::SeqCst);
    }
}

/// **VALUE**: Verifies destruction listeners fire exactly once.
///
/// **WHY THIS MATTERS**: Teardown of every subscription and socket hangs off these
/// listeners. Firing twice would stop producers twice.
///
/// **BUG THIS CATCHES**: Would catch a non-idempotent `destroy`.
#[test]
fn given_destroy_listener_when_destroyed_twice_then_fires_once() {
    // GIVEN: A viewport with one destruction listener
    let (viewport, _outbox) = Viewport::new();
    let (count, fired) = counter();
    viewport.on_destroyed(bump(&count));

    // WHEN: Destroying twice
    viewport.destroy();
    viewport.destroy();

    // THEN: The listener ran once
    assert_eq!(fired(), 1);
    assert!(viewport.is_destroyed());
}

/// **VALUE**: Verifies a listener registered on a dead viewport runs immediately.
///
/// **WHY THIS MATTERS**: A subscription may start just as its window closes. Without
/// this, its producer would never be stopped.
///
/// **BUG THIS CATCHES**: Would catch listeners silently queued on a destroyed viewport.
#[test]
fn given_destroyed_viewport_when_registering_listener_then_runs_immediately() {
    let (viewport, _outbox) = Viewport::new();
    viewport.destroy();
    let (count, fired) = counter();

    viewport.on_destroyed(bump(&count));
    viewport.on_navigated(bump(&count));

    assert_eq!(fired(), 1, "Only the destruction listener should run");
}

/// **VALUE**: Verifies navigation fires only navigation listeners, and only once.
///
/// **WHY THIS MATTERS**: A navigated viewport stays alive and may host new
/// subscriptions; its destruction must still be observed later.
///
/// **BUG THIS CATCHES**: Would catch navigation clearing destruction listeners.
#[test]
fn given_both_listeners_when_navigated_then_destroy_listener_survives() {
    let (viewport, _outbox) = Viewport::new();
    let (navigated, navigations) = counter();
    let (destroyed, destructions) = counter();
    viewport.on_navigated(bump(&navigated));
    viewport.on_destroyed(bump(&destroyed));

    viewport.navigate();
    viewport.navigate();
    assert_eq!(navigations(), 1);
    assert_eq!(destructions(), 0);

    viewport.destroy();
    assert_eq!(destructions(), 1);
}

/// **VALUE**: Verifies detached listeners never run.
///
/// **WHY THIS MATTERS**: An explicitly stopped subscription detaches its viewport
/// listeners so its producer is not stopped a second time on window close.
///
/// **BUG THIS CATCHES**: Would catch `off` matching the wrong listener id.
#[test]
fn given_detached_listener_when_destroyed_then_does_not_run() {
    let (viewport, _outbox) = Viewport::new();
    let (count, fired) = counter();
    let detached = viewport.on_destroyed(bump(&count));
    viewport.on_destroyed(bump(&count));

    viewport.off(detached);
    viewport.destroy();

    assert_eq!(fired(), 1);
}

/// **VALUE**: Verifies nothing is pushed into a destroyed viewport.
///
/// **WHY THIS MATTERS**: Late messages for a closed window must be dropped.
///
/// **BUG THIS CATCHES**: Would catch `send` ignoring the destroyed flag.
#[test]
fn given_destroyed_viewport_when_sending_then_message_dropped() {
    let (viewport, mut outbox) = Viewport::new();
    assert!(viewport.send(ServerMessage::PortClosed { port: "a".to_string() }));

    viewport.destroy();

    assert!(!viewport.send(ServerMessage::PortClosed { port: "b".to_string() }));
    let messages = drain(&mut outbox);
    assert_eq!(messages, vec![ServerMessage::PortClosed { port: "a".to_string() }]);
}
