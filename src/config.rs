//! # Configuration Management
//!
//! Centralized configuration for the datagram protocol.
//!
//! Wire-level limits (fragment size, ring size, padding) are compile-time constants because
//! both peers must agree on them. Timing and capacity parameters live in [`NetworkConfig`]
//! and can be tuned per process.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides via `from_env()`
//!
//! ## Timing Model
//! Durations are stored as [`Duration`] and serialized as integer milliseconds. The state
//! machines work on `f64` seconds supplied by the caller, see [`ClientTiming`] and
//! [`ServerTiming`].

use crate::error::{constants, ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Protocol id mixed into every packet crc32; never sent on the wire
pub const PROTOCOL_ID: u32 = 0x5566_7788;

/// Upper bound on connected clients per server
pub const MAX_CLIENTS: usize = 32;

/// Number of slots in the server challenge hash table
pub const CHALLENGE_HASH_SIZE: usize = 1024;

/// Maximum size of a single fragment payload in bytes
pub const MAX_FRAGMENT_SIZE: usize = 1024;

/// Maximum number of fragments a packet may be split into
pub const MAX_FRAGMENTS_PER_PACKET: usize = 256;

/// Largest payload the fragmentation layer can carry (exclusive bound)
pub const MAX_PACKET_SIZE: usize = MAX_FRAGMENT_SIZE * MAX_FRAGMENTS_PER_PACKET;

/// Number of in-flight sequences the reassembly ring can hold
pub const PACKET_BUFFER_SIZE: usize = 256;

/// Fragments whose sequence is further than this from the current sequence are dropped
pub const SEQUENCE_WINDOW: i32 = 1024;

/// Zero bytes appended to every connection request so it is never smaller than the challenge
pub const CONNECTION_REQUEST_PADDING: usize = 256;

/// Receive buffer size; large enough for any fragment or handshake packet
pub const MAX_DATAGRAM_SIZE: usize = MAX_FRAGMENT_SIZE + 64;

/// Default UDP port for servers
pub const SERVER_PORT: u16 = 50000;

/// Default UDP port for clients
pub const CLIENT_PORT: u16 = 60000;

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server-specific configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Client-specific configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| {
            ProtocolError::ConfigError(format!("{}: {e}", constants::ERR_CONFIG_OPEN))
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).map_err(|e| {
            ProtocolError::ConfigError(format!("{}: {e}", constants::ERR_CONFIG_READ))
        })?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("DATAGRAM_PROTOCOL_SERVER_ADDRESS") {
            config.server.address = addr.clone();
            config.client.server_address = addr;
        }

        if let Ok(addr) = std::env::var("DATAGRAM_PROTOCOL_CLIENT_ADDRESS") {
            config.client.address = addr;
        }

        if let Ok(max) = std::env::var("DATAGRAM_PROTOCOL_MAX_CLIENTS") {
            if let Ok(val) = max.parse::<usize>() {
                config.server.max_clients = val;
            }
        }

        if let Ok(timeout) = std::env::var("DATAGRAM_PROTOCOL_KEEP_ALIVE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.server.keep_alive_timeout = Duration::from_millis(val);
                config.client.keep_alive_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(id) = std::env::var("DATAGRAM_PROTOCOL_ID") {
            let id = id.trim_start_matches("0x");
            if let Ok(val) = u32::from_str_radix(id, 16) {
                config.transport.protocol_id = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn validate_address(errors: &mut Vec<String>, label: &str, address: &str) {
    if address.is_empty() {
        errors.push(format!("{label} address cannot be empty"));
    } else if address.parse::<SocketAddr>().is_err() {
        errors.push(format!(
            "Invalid {label} address format: '{address}' (expected format: '0.0.0.0:50000')"
        ));
    }
}

fn validate_rate(errors: &mut Vec<String>, label: &str, rate: Duration) {
    if rate.as_millis() < 10 {
        errors.push(format!("{label} too short (minimum: 10ms)"));
    } else if rate.as_secs() > 60 {
        errors.push(format!("{label} too long (maximum: 60s)"));
    }
}

fn validate_timeout(errors: &mut Vec<String>, label: &str, timeout: Duration, rate: Duration) {
    if timeout.as_millis() < 100 {
        errors.push(format!("{label} too short (minimum: 100ms)"));
    } else if timeout.as_secs() > 300 {
        errors.push(format!("{label} too long (maximum: 300s)"));
    }
    if timeout <= rate {
        errors.push(format!("{label} must be longer than its send rate"));
    }
}

/// Server-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server listen address (e.g., "0.0.0.0:50000")
    pub address: String,

    /// Number of client slots, at most [`MAX_CLIENTS`]
    pub max_clients: usize,

    /// Number of challenge hash slots
    pub challenge_hash_size: usize,

    /// Minimum interval between challenges sent to the same pending client
    #[serde(with = "duration_serde")]
    pub challenge_send_rate: Duration,

    /// How long a challenge entry stays valid
    #[serde(with = "duration_serde")]
    pub challenge_timeout: Duration,

    /// Minimum interval between keep-alives re-confirming a repeated response
    #[serde(with = "duration_serde")]
    pub confirm_send_rate: Duration,

    /// Interval between keep-alives sent to connected clients
    #[serde(with = "duration_serde")]
    pub keep_alive_send_rate: Duration,

    /// Silence after which a connected client is dropped
    #[serde(with = "duration_serde")]
    pub keep_alive_timeout: Duration,

    /// Interval of the service tick loop
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{SERVER_PORT}"),
            max_clients: MAX_CLIENTS,
            challenge_hash_size: CHALLENGE_HASH_SIZE,
            challenge_send_rate: Duration::from_millis(100),
            challenge_timeout: Duration::from_secs(10),
            confirm_send_rate: Duration::from_millis(100),
            keep_alive_send_rate: Duration::from_secs(1),
            keep_alive_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_millis(10),
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_address(&mut errors, "server", &self.address);

        if self.max_clients == 0 {
            errors.push("Max clients must be greater than 0".to_string());
        } else if self.max_clients > MAX_CLIENTS {
            errors.push(format!(
                "Max clients too large: {} (maximum: {MAX_CLIENTS})",
                self.max_clients
            ));
        }

        if self.challenge_hash_size == 0 {
            errors.push("Challenge hash size must be greater than 0".to_string());
        } else if self.challenge_hash_size < self.max_clients {
            errors.push("Challenge hash size should be at least max clients".to_string());
        }

        validate_rate(&mut errors, "Challenge send rate", self.challenge_send_rate);
        validate_rate(&mut errors, "Confirm send rate", self.confirm_send_rate);
        validate_rate(&mut errors, "Keep-alive send rate", self.keep_alive_send_rate);
        validate_timeout(
            &mut errors,
            "Challenge timeout",
            self.challenge_timeout,
            self.challenge_send_rate,
        );
        validate_timeout(
            &mut errors,
            "Keep-alive timeout",
            self.keep_alive_timeout,
            self.keep_alive_send_rate,
        );

        if self.tick_interval.is_zero() {
            errors.push("Tick interval must be greater than 0".to_string());
        }

        errors
    }

    /// Timing parameters in seconds, as consumed by the server state machine
    pub fn timing(&self) -> ServerTiming {
        ServerTiming {
            challenge_send_rate: self.challenge_send_rate.as_secs_f64(),
            challenge_timeout: self.challenge_timeout.as_secs_f64(),
            confirm_send_rate: self.confirm_send_rate.as_secs_f64(),
            keep_alive_send_rate: self.keep_alive_send_rate.as_secs_f64(),
            keep_alive_timeout: self.keep_alive_timeout.as_secs_f64(),
        }
    }
}

/// Server timing parameters in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerTiming {
    pub challenge_send_rate: f64,
    pub challenge_timeout: f64,
    pub confirm_send_rate: f64,
    pub keep_alive_send_rate: f64,
    pub keep_alive_timeout: f64,
}

impl Default for ServerTiming {
    fn default() -> Self {
        ServerConfig::default().timing()
    }
}

/// Client-specific configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Local bind address
    pub address: String,

    /// Server to connect to
    pub server_address: String,

    /// Interval between connection requests
    #[serde(with = "duration_serde")]
    pub request_send_rate: Duration,

    /// Interval between challenge responses
    #[serde(with = "duration_serde")]
    pub response_send_rate: Duration,

    /// Interval between keep-alives once connected
    #[serde(with = "duration_serde")]
    pub keep_alive_send_rate: Duration,

    /// Silence after which a connection request gives up
    #[serde(with = "duration_serde")]
    pub connection_request_timeout: Duration,

    /// Silence after which a challenge response gives up
    #[serde(with = "duration_serde")]
    pub challenge_response_timeout: Duration,

    /// Silence after which an established connection is dropped
    #[serde(with = "duration_serde")]
    pub keep_alive_timeout: Duration,

    /// Lifetime of an unconfirmed client salt before it is re-rolled
    #[serde(with = "duration_serde")]
    pub client_salt_timeout: Duration,

    /// Interval of the service tick loop
    #[serde(with = "duration_serde")]
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{CLIENT_PORT}"),
            server_address: format!("127.0.0.1:{SERVER_PORT}"),
            request_send_rate: Duration::from_millis(100),
            response_send_rate: Duration::from_millis(100),
            keep_alive_send_rate: Duration::from_secs(1),
            connection_request_timeout: Duration::from_secs(5),
            challenge_response_timeout: Duration::from_secs(5),
            keep_alive_timeout: Duration::from_secs(10),
            client_salt_timeout: Duration::from_secs(1),
            tick_interval: Duration::from_millis(10),
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        validate_address(&mut errors, "client", &self.address);
        validate_address(&mut errors, "server", &self.server_address);

        validate_rate(&mut errors, "Request send rate", self.request_send_rate);
        validate_rate(&mut errors, "Response send rate", self.response_send_rate);
        validate_rate(&mut errors, "Keep-alive send rate", self.keep_alive_send_rate);
        validate_timeout(
            &mut errors,
            "Connection request timeout",
            self.connection_request_timeout,
            self.request_send_rate,
        );
        validate_timeout(
            &mut errors,
            "Challenge response timeout",
            self.challenge_response_timeout,
            self.response_send_rate,
        );
        validate_timeout(
            &mut errors,
            "Keep-alive timeout",
            self.keep_alive_timeout,
            self.keep_alive_send_rate,
        );

        if self.client_salt_timeout.as_millis() < 100 {
            errors.push("Client salt timeout too short (minimum: 100ms)".to_string());
        }

        if self.tick_interval.is_zero() {
            errors.push("Tick interval must be greater than 0".to_string());
        }

        errors
    }

    /// Timing parameters in seconds, as consumed by the client state machine
    pub fn timing(&self) -> ClientTiming {
        ClientTiming {
            request_send_rate: self.request_send_rate.as_secs_f64(),
            response_send_rate: self.response_send_rate.as_secs_f64(),
            keep_alive_send_rate: self.keep_alive_send_rate.as_secs_f64(),
            connection_request_timeout: self.connection_request_timeout.as_secs_f64(),
            challenge_response_timeout: self.challenge_response_timeout.as_secs_f64(),
            keep_alive_timeout: self.keep_alive_timeout.as_secs_f64(),
            client_salt_timeout: self.client_salt_timeout.as_secs_f64(),
        }
    }
}

/// Client timing parameters in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClientTiming {
    pub request_send_rate: f64,
    pub response_send_rate: f64,
    pub keep_alive_send_rate: f64,
    pub connection_request_timeout: f64,
    pub challenge_response_timeout: f64,
    pub keep_alive_timeout: f64,
    pub client_salt_timeout: f64,
}

impl Default for ClientTiming {
    fn default() -> Self {
        ClientConfig::default().timing()
    }
}

/// Transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Protocol id mixed into the crc32 of every packet
    pub protocol_id: u32,

    /// Size of the receive buffer handed to the socket
    pub max_datagram_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            protocol_id: PROTOCOL_ID,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.protocol_id == 0 {
            errors.push("Protocol id should not be 0".to_string());
        }

        if self.max_datagram_size < MAX_DATAGRAM_SIZE {
            errors.push(format!(
                "Max datagram size too small: {} (minimum: {MAX_DATAGRAM_SIZE})",
                self.max_datagram_size
            ));
        } else if self.max_datagram_size > 65_507 {
            errors.push(format!(
                "Max datagram size too large: {} (UDP maximum: 65507)",
                self.max_datagram_size
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("datagram-protocol"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
