use crate::connection_info::ConnectionInfo;

use tempfile::TempDir;

/// **VALUE**: Verifies the connection file written by the host reads back unchanged.
///
/// **WHY THIS MATTERS**: UI processes find the bridge only through this file.
///
/// **BUG THIS CATCHES**: Would catch field renames that break readers, or a leftover
/// temp file from a non-atomic write.
#[test]
fn given_connection_info_when_written_then_read_back() {
    let dir = TempDir::new().unwrap();
    let info = ConnectionInfo::new("ws://127.0.0.1:4100".to_string(), 4100, "token".to_string());

    info.write(dir.path()).unwrap();
    let read = ConnectionInfo::read(dir.path()).unwrap();

    assert_eq!(read, info);
    assert!(!dir.path().join("connection.json.tmp").exists());
}

/// **VALUE**: Verifies removal deletes the file and tolerates a missing one.
///
/// **BUG THIS CATCHES**: Would catch `remove` panicking on a second shutdown.
#[test]
fn given_written_file_when_removed_twice_then_gone_without_panic() {
    let dir = TempDir::new().unwrap();
    ConnectionInfo::new("ws://127.0.0.1:1".to_string(), 1, "t".to_string())
        .write(dir.path())
        .unwrap();

    ConnectionInfo::remove(dir.path());
    ConnectionInfo::remove(dir.path());

    assert!(ConnectionInfo::read(dir.path()).is_err());
}
