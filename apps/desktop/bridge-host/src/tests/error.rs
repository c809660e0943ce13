// Unit tests for error module

use crate::error::HostError;

use bridge_core::error::ipc::IpcError;

use common::ErrorLocation;

use std::panic::Location;

/// **VALUE**: Tests that errors can be serialized.
///
/// **WHY THIS MATTERS**: Startup failures are reported as structured data; a
/// non-serializable field would break that.
///
/// **BUG THIS CATCHES**: Would catch a removed `#[derive(Serialize)]` or a new
/// non-serializable field.
#[test]
fn given_host_error_when_serialized_then_succeeds() {
    // GIVEN: A HostError
    let err = HostError::Config {
        message: String::from("Test"),
        location: ErrorLocation::from(Location::caller()),
    };

    // WHEN: Serializing to JSON
    let json = serde_json::to_string(&err).expect("Error should be serializable");

    // THEN: Should contain the variant and the message
    assert!(json.contains("Config"), "JSON should contain variant name");
    assert!(json.contains("Test"), "JSON should contain message");
}

/// **VALUE**: Verifies core errors keep their message when converted.
///
/// **BUG THIS CATCHES**: Would catch a `From` impl that drops the source message.
#[test]
fn given_ipc_error_when_converted_then_core_variant_with_message() {
    let ipc = IpcError::Io {
        message: String::from("address in use"),
        location: ErrorLocation::from(Location::caller()),
    };

    let err = HostError::from(ipc);

    match err {
        HostError::Core { message, .. } => assert!(message.contains("address in use")),
        other => panic!("Expected Core, got {other:?}"),
    }
}
