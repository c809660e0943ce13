use crate::channel::ChannelId;
use crate::envelope::{ErrorInfo, SubscriptionEvent, UnaryEnvelope};
use crate::protocol::ServerMessage;

use std::any::Any;
use std::io;
use std::panic::{UnwindSafe, catch_unwind, panic_any};

use serde_json::{Value, json};

fn panic_payload(body: impl FnOnce() + UnwindSafe) -> Box<dyn Any + Send> {
    catch_unwind(body).expect_err("body should panic")
}

#[derive(Debug, thiserror::Error)]
#[error("loading settings failed")]
struct LoadError {
    #[source]
    source: io::Error,
}

/// **VALUE**: Verifies a structured error keeps its message and its cause chain.
///
/// **WHY THIS MATTERS**: The UI only sees what crosses the wire. The top-level message
/// must round-trip exactly; the causes are what makes a failure debuggable.
///
/// **BUG THIS CATCHES**: Would catch a wrapper that only keeps `to_string()` of the
/// outermost error, or one that formats the chain into the message.
#[test]
fn given_error_with_source_when_wrapping_then_message_and_causes_kept() {
    let error = LoadError {
        source: io::Error::other("disk gone"),
    };

    let info = ErrorInfo::from_error(&error);

    assert_eq!(info.message, "loading settings failed");
    assert_eq!(info.detail, Some(json!({ "causes": ["disk gone"] })));
    assert_eq!(info.kind, None);
}

/// **VALUE**: Verifies panic payloads of every shape become an `ErrorInfo`.
///
/// **WHY THIS MATTERS**: Wrapping must never fail; a handler can panic with a literal,
/// a formatted string, or an arbitrary value.
///
/// **BUG THIS CATCHES**: Would catch a wrapper that only handles `&str` payloads.
#[test]
fn given_panic_payloads_when_wrapping_then_never_fails() {
    let literal = panic_payload(|| panic!("boom"));
    let formatted = panic_payload(|| panic!("boom {}", 42));
    let opaque = panic_payload(|| panic_any(7_u32));

    let literal = ErrorInfo::from_panic(literal);
    let formatted = ErrorInfo::from_panic(formatted);
    let opaque = ErrorInfo::from_panic(opaque);

    assert_eq!(literal.message, "boom");
    assert_eq!(formatted.message, "boom 42");
    assert!(!opaque.message.is_empty(), "Opaque payload still gets a message");
    for info in [literal, formatted, opaque] {
        assert_eq!(info.kind.as_deref(), Some("panic"));
    }
}

/// **VALUE**: Verifies the unary envelope wire shape is `{value}` or `{error}`.
///
/// **WHY THIS MATTERS**: The UI side switches on the key; both sides must agree.
///
/// **BUG THIS CATCHES**: Would catch a changed serde representation (tag/content
/// fields, capitalized variants).
#[test]
fn given_unary_envelopes_when_serialized_then_single_key_objects() {
    let ok: UnaryEnvelope = UnaryEnvelope::Value(json!(3));
    let failed: UnaryEnvelope = UnaryEnvelope::Error(ErrorInfo::new("nope"));

    assert_eq!(serde_json::to_value(&ok).unwrap(), json!({ "value": 3 }));
    assert_eq!(
        serde_json::to_value(&failed).unwrap(),
        json!({ "error": { "message": "nope" } })
    );
}

/// **VALUE**: Verifies an error envelope turns back into an error with the same message.
///
/// **WHY THIS MATTERS**: Unary failures must surface as a rejected call whose message
/// matches what the handler raised.
///
/// **BUG THIS CATCHES**: Would catch lost kind/detail or a swapped Ok/Err mapping.
#[test]
fn given_error_envelope_when_into_result_then_remote_error_matches() {
    let envelope: UnaryEnvelope = UnaryEnvelope::Error(
        ErrorInfo::new("no such session")
            .with_kind("not_found")
            .with_detail(json!({ "id": 4 })),
    );

    let error = envelope.into_result().expect_err("should be an error");

    assert_eq!(error.message(), "no such session");
    assert_eq!(error.to_string(), "no such session");
    assert_eq!(error.kind(), Some("not_found"));
    assert_eq!(error.detail(), Some(&json!({ "id": 4 })));
}

/// **VALUE**: Verifies the terminal sentinel is a JSON `null`, distinct from any event.
///
/// **WHY THIS MATTERS**: Subscribers detect the end of a stream by `event: null`. An
/// empty event object must not be confused with it.
///
/// **BUG THIS CATCHES**: Would catch `skip_serializing_if` on the event field, which
/// would drop the key instead of sending `null`.
#[test]
fn given_terminal_event_when_serialized_then_event_is_null() {
    let channel = ChannelId::from("ipc:subscribe:clock:1".to_string());
    let terminal = ServerMessage::Event {
        channel: channel.clone(),
        event: None,
    };
    let live = ServerMessage::Event {
        channel,
        event: Some(SubscriptionEvent::message(json!(1))),
    };

    let terminal = serde_json::to_value(&terminal).unwrap();
    let live = serde_json::to_value(&live).unwrap();

    assert_eq!(terminal["event"], Value::Null);
    assert_eq!(live["event"], json!({ "message": 1 }));
}
