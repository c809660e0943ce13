use crate::config::{BridgeConfig, SubscriptionConfig};
use crate::error::config::ConfigError;

use std::time::Duration;

use tempfile::TempDir;

/// **VALUE**: Verifies a missing config file yields defaults.
///
/// **WHY THIS MATTERS**: First start has no config file; the bridge must come up anyway.
///
/// **BUG THIS CATCHES**: Would catch `load` returning `ConfigError::Read` for a missing file.
#[test]
fn given_no_config_file_when_load_then_defaults() {
    let dir = TempDir::new().unwrap();

    let config = BridgeConfig::load(dir.path()).expect("defaults expected");

    assert_eq!(config, BridgeConfig::default());
    assert_eq!(config.ipc.host, crate::BRIDGE_SERVER_HOSTNAME);
    assert_eq!(config.ipc.port, crate::BRIDGE_DEFAULT_PORT);
    assert_eq!(config.subscription.start_timeout(), None);
}

/// **VALUE**: Verifies a saved config loads back unchanged and no temp file remains.
///
/// **WHY THIS MATTERS**: Saves are atomic (temp file + rename); a stray temp file
/// means the rename did not happen.
///
/// **BUG THIS CATCHES**: Would catch field renames breaking serialization, or a
/// write straight to the target file.
#[test]
fn given_custom_config_when_save_and_load_then_equal() {
    let dir = TempDir::new().unwrap();
    let mut config = BridgeConfig::default();
    config.ipc.port = 0;
    config.ipc.auth_token = Some("secret".to_string());
    config.subscription.start_timeout_ms = Some(1500);
    config.logging.level = "trace".to_string();

    config.save(dir.path()).expect("save should succeed");
    let loaded = BridgeConfig::load(dir.path()).expect("load should succeed");

    assert_eq!(loaded, config);
    assert_eq!(loaded.subscription.start_timeout(), Some(Duration::from_millis(1500)));
    assert!(!dir.path().join("config.json.tmp").exists());
}

/// **VALUE**: Verifies partial files fill the gaps with defaults.
///
/// **WHY THIS MATTERS**: Users hand-edit config files and only write what they change.
///
/// **BUG THIS CATCHES**: Would catch a missing `#[serde(default)]` on a section.
#[test]
fn given_partial_file_when_load_then_missing_sections_defaulted() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.json"), r#"{ "ipc": { "port": 4100 } }"#).unwrap();

    let config = BridgeConfig::load(dir.path()).expect("partial config is valid");

    assert_eq!(config.ipc.port, 4100);
    assert_eq!(config.ipc.host, crate::BRIDGE_SERVER_HOSTNAME);
    assert_eq!(config.subscription, SubscriptionConfig::default());
}

/// **VALUE**: Verifies a corrupt file is an error, not silently replaced by defaults.
///
/// **BUG THIS CATCHES**: Would catch `load` swallowing parse errors.
#[test]
fn given_corrupt_file_when_load_then_parse_error() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.json"), "{ not json").unwrap();

    let result = BridgeConfig::load(dir.path());

    assert!(matches!(result, Err(ConfigError::Parse { .. })));
}

/// **VALUE**: Verifies validation rejects values the bridge cannot run with.
///
/// **WHY THIS MATTERS**: The IPC server has no protection beyond its token; binding a
/// public interface would expose every registered operation.
///
/// **BUG THIS CATCHES**: Would catch a removed or inverted validation rule.
#[test]
fn given_invalid_values_when_validate_then_validation_error() {
    let mut public_host = BridgeConfig::default();
    public_host.ipc.host = "0.0.0.0".to_string();

    let mut blank_token = BridgeConfig::default();
    blank_token.ipc.auth_token = Some("   ".to_string());

    let mut zero_timeout = BridgeConfig::default();
    zero_timeout.subscription.start_timeout_ms = Some(0);

    let mut bad_level = BridgeConfig::default();
    bad_level.logging.level = "verbose".to_string();

    let mut future_version = BridgeConfig::default();
    future_version.version = 99;

    for config in [public_host, blank_token, zero_timeout, bad_level, future_version] {
        assert!(
            matches!(config.validate(), Err(ConfigError::Invalid { .. })),
            "Should reject {config:?}"
        );
    }
    assert!(BridgeConfig::default().validate().is_ok());
}

/// **VALUE**: Verifies config errors name the file or the key that is wrong.
///
/// **WHY THIS MATTERS**: These messages end up in the host's startup failure; the
/// user needs to know what to edit.
///
/// **BUG THIS CATCHES**: Would catch error messages that drop the path or the key.
#[test]
fn given_bad_config_when_reported_then_message_names_path_and_key() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.json"), "{ not json").unwrap();
    let mut public_host = BridgeConfig::default();
    public_host.ipc.host = "0.0.0.0".to_string();

    let parse = BridgeConfig::load(dir.path()).unwrap_err().to_string();
    let invalid = public_host.validate().unwrap_err().to_string();

    assert!(parse.starts_with("Bridge config "), "{parse}");
    assert!(parse.contains("config.json"), "{parse}");
    assert!(invalid.starts_with("Invalid bridge config: ipc.host"), "{invalid}");
    assert!(invalid.contains("0.0.0.0"), "{invalid}");
}
