//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use datagram_protocol::config::{
    ClientConfig, LoggingConfig, NetworkConfig, ServerConfig, TransportConfig, MAX_CLIENTS,
    PROTOCOL_ID,
};
use datagram_protocol::error::ProtocolError;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let mut config = NetworkConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_client_address() {
    let mut config = NetworkConfig::default();
    config.client.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_max_clients_bounds() {
    let mut config = ServerConfig {
        max_clients: 0,
        ..ServerConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max clients must be greater than 0")));

    config.max_clients = MAX_CLIENTS + 1;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max clients too large")));
}

#[test]
fn test_challenge_table_smaller_than_client_count() {
    let config = ServerConfig {
        max_clients: 16,
        challenge_hash_size: 8,
        ..ServerConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("at least max clients")));
}

#[test]
fn test_short_send_rate() {
    let config = ClientConfig {
        request_send_rate: Duration::from_millis(1),
        ..ClientConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Request send rate too short")));
}

#[test]
fn test_timeout_must_exceed_send_rate() {
    let config = ServerConfig {
        keep_alive_send_rate: Duration::from_secs(5),
        keep_alive_timeout: Duration::from_secs(5),
        ..ServerConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Keep-alive timeout must be longer than its send rate")));
}

#[test]
fn test_long_timeout() {
    let config = ClientConfig {
        keep_alive_timeout: Duration::from_secs(600),
        ..ClientConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Keep-alive timeout too long")));
}

#[test]
fn test_transport_limits() {
    let config = TransportConfig {
        protocol_id: 0,
        max_datagram_size: 100,
    };
    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Protocol id")));
    assert!(errors.iter().any(|e| e.contains("Max datagram size too small")));

    let config = TransportConfig {
        max_datagram_size: 70_000,
        ..TransportConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max datagram size too large")));
}

#[test]
fn test_empty_app_name() {
    let config = LoggingConfig {
        app_name: String::new(),
        ..LoggingConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_validate_strict_collects_every_error() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.max_clients = 0;
        c.logging.app_name = String::new();
    });

    match config.validate_strict() {
        Err(ProtocolError::ConfigError(message)) => {
            assert!(message.contains("Max clients"));
            assert!(message.contains("Application name"));
        }
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn test_toml_round_trip() {
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.max_clients = 8;
        c.client.keep_alive_timeout = Duration::from_millis(7500);
        c.logging.log_level = Level::DEBUG;
    });

    let toml = toml::to_string_pretty(&config).expect("serialize");
    let parsed = NetworkConfig::from_toml(&toml).expect("parse");

    assert_eq!(parsed.server.max_clients, 8);
    assert_eq!(parsed.client.keep_alive_timeout, Duration::from_millis(7500));
    assert_eq!(parsed.logging.log_level, Level::DEBUG);
    assert_eq!(parsed.transport.protocol_id, PROTOCOL_ID);
}

#[test]
fn test_partial_toml_uses_defaults() {
    let parsed = NetworkConfig::from_toml(
        r#"
        [logging]
        app_name = "arena"
        log_level = "warn"
        json_format = true
        "#,
    )
    .expect("parse");

    assert_eq!(parsed.logging.app_name, "arena");
    assert_eq!(parsed.logging.log_level, Level::WARN);
    assert_eq!(parsed.server.max_clients, MAX_CLIENTS);
    assert!(parsed.validate().is_empty());
}

#[test]
fn test_invalid_log_level_is_rejected() {
    let result = NetworkConfig::from_toml(
        r#"
        [logging]
        app_name = "arena"
        log_level = "loud"
        json_format = false
        "#,
    );
    assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
}

#[test]
fn test_example_config_parses() {
    let example = NetworkConfig::example_config();
    let parsed = NetworkConfig::from_toml(&example).expect("example config should parse");
    assert!(parsed.validate().is_empty());
}

#[test]
fn test_missing_file() {
    let result = NetworkConfig::from_file("/nonexistent/datagram-protocol.toml");
    match result {
        Err(ProtocolError::ConfigError(message)) => {
            assert!(message.contains("Failed to open config file"))
        }
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn test_save_and_reload() {
    let path = std::env::temp_dir().join(format!("datagram-protocol-{}.toml", std::process::id()));
    let config = NetworkConfig::default_with_overrides(|config| {
        config.server.max_clients = 8;
        config.client.keep_alive_timeout = Duration::from_millis(7500);
        config.transport.protocol_id = 0xCAFE_F00D;
    });
    config.save_to_file(&path).unwrap();

    let loaded = NetworkConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded.server.max_clients, 8);
    assert_eq!(loaded.client.keep_alive_timeout, Duration::from_millis(7500));
    assert_eq!(loaded.transport.protocol_id, 0xCAFE_F00D);
    assert!(loaded.validate().is_empty());
}
