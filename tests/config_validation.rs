//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use game_proxy::config::{LoggingConfig, ProxyConfig, VERSION_CHECK_OPCODE};
use game_proxy::dispatch::DispatchSettings;
use game_proxy::relay::RelaySettings;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = ProxyConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_invalid_listen_address() {
    let mut config = ProxyConfig::default();
    config.server.listen_address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid listen address")));
}

#[test]
fn test_upstream_accepts_hostnames() {
    let mut config = ProxyConfig::default();
    config.server.upstream_address = "login.example.net:7801".to_string();
    assert!(config.validate().is_empty());

    config.server.upstream_address = "login.example.net".to_string();
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Invalid upstream address")));

    config.server.upstream_address = String::new();
    assert!(config.validate().iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_timeout_bounds() {
    let mut config = ProxyConfig::default();
    config.server.connect_timeout = Duration::from_millis(50);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Connect timeout too short")));

    config.server.connect_timeout = Duration::from_secs(400);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Connect timeout too long")));

    let mut config = ProxyConfig::default();
    config.server.idle_timeout = Duration::from_millis(10);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Idle timeout too short")));
}

#[test]
fn test_zero_max_connections() {
    let mut config = ProxyConfig::default();
    config.server.max_connections = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max connections must be greater than 0")));
}

#[test]
fn test_forced_version_is_only_a_warning() {
    let mut config = ProxyConfig::default();
    config.protocol.forced_version = Some(381_200);

    let errors = config.validate();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("WARNING:"));
    assert!(config.validate_strict().is_err());

    config.protocol.version = Some(0);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Protocol version 0")));
}

#[test]
fn test_logging_outputs() {
    let mut config = ProxyConfig::default();
    config.logging = LoggingConfig {
        log_to_console: false,
        log_to_file: false,
        ..LoggingConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("At least one logging output")));

    config.logging.log_to_file = true;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_toml_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("proxy.toml");

    let config = ProxyConfig::default_with_overrides(|c| {
        c.server.upstream_address = "10.0.0.5:7801".into();
        c.server.idle_timeout = Duration::from_secs(45);
        c.protocol.version = Some(381_200);
        c.mods.autoload = false;
        c.logging.log_level = Level::DEBUG;
    });
    config.save_to_file(&path).expect("save");

    let loaded = ProxyConfig::from_file(&path).expect("load");
    assert_eq!(loaded.server.upstream_address, "10.0.0.5:7801");
    assert_eq!(loaded.server.idle_timeout, Duration::from_secs(45));
    assert_eq!(loaded.protocol.version, Some(381_200));
    assert_eq!(loaded.protocol.bootstrap_opcode, VERSION_CHECK_OPCODE);
    assert!(!loaded.mods.autoload);
    assert_eq!(loaded.logging.log_level, Level::DEBUG);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = ProxyConfig::from_toml(
        r#"
        [protocol]
        data_dir = "/srv/proxy/data"
        bootstrap_opcode = 19900
        forced_version = 366_118
        "#,
    )
    .expect("parse");

    let settings = DispatchSettings::from(&config.protocol);
    assert_eq!(settings.bootstrap_opcode, 19900);
    assert_eq!(settings.forced_version, Some(366_118));
    assert_eq!(settings.preset_version, None);

    let relay = RelaySettings::from(&config.server);
    assert_eq!(relay.idle_timeout, config.server.idle_timeout);
    assert!(config.mods.autoload);

    assert!(ProxyConfig::from_toml("[server]\nmax_connections = \"many\"").is_err());
}
