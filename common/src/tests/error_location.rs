use crate::ErrorLocation;

/// **VALUE**: Verifies that `ErrorLocation::caller()` points at the call site, not at itself.
///
/// **WHY THIS MATTERS**: Every bridge error (dispatch, transport, config) is built with a
/// location. If the helper reported its own line, every error would point into `common`.
///
/// **BUG THIS CATCHES**: Would catch if `#[track_caller]` is dropped from `caller()`.
#[test]
fn given_caller_helper_when_invoked_then_reports_this_file() {
    // GIVEN / WHEN: Capturing the caller location from a test
    let location = ErrorLocation::caller();

    // THEN: The file is this test file
    assert!(
        location.file.contains("tests"),
        "Should point at the test file, got {}",
        location.file
    );
    assert!(location.column > 0, "Should capture column number");
}

/// **VALUE**: Verifies that nested `#[track_caller]` helpers give distinct lines per call site.
///
/// **WHY THIS MATTERS**: Error constructors in the bridge are usually one level deep
/// (`From` impls, helper builders). Each call site must stay distinguishable in logs.
///
/// **BUG THIS CATCHES**: Would catch broken location propagation through helper functions.
#[test]
fn given_tracked_helper_when_called_twice_then_lines_differ() {
    // GIVEN: A tracked helper
    #[track_caller]
    fn capture() -> ErrorLocation {
        ErrorLocation::caller()
    }

    // WHEN: Calling it from two consecutive lines
    let first = capture();
    let second = capture();

    // THEN: Same file, consecutive lines
    assert_eq!(first.file, second.file);
    assert_eq!(first.line + 1, second.line, "Lines should be sequential");
}

/// **VALUE**: Verifies the bracketed `[file:line:column]` display format.
///
/// **WHY THIS MATTERS**: Error messages logged by the host and shipped inside error
/// envelopes end with this suffix; log tooling greps for it.
///
/// **BUG THIS CATCHES**: Would catch a changed Display implementation.
#[test]
fn given_location_when_formatted_then_uses_bracketed_format() {
    // GIVEN: A location
    let location = ErrorLocation::caller();

    // WHEN: Formatting it
    let formatted = location.to_string();

    // THEN: "[file:line:column]"
    assert!(formatted.starts_with('[') && formatted.ends_with(']'));
    assert!(formatted.contains(&format!(":{}:", location.line)));
}

/// **VALUE**: Verifies that a location serializes as a plain JSON object.
///
/// **WHY THIS MATTERS**: Host errors are serialized for the UI process, location included.
///
/// **BUG THIS CATCHES**: Would catch a removed `Serialize` derive.
#[test]
fn given_location_when_serialized_then_contains_fields() {
    let location = ErrorLocation::caller();

    let json = serde_json::to_value(location).expect("location should serialize");

    assert_eq!(json["line"], location.line);
    assert!(json["file"].as_str().is_some());
}
