//! # Configuration Management
//!
//! Centralized configuration for the proxy process.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`GAME_PROXY_*`)
//!
//! ## Sections
//! - `server`: listen/upstream addresses, timeouts, connection limits
//! - `protocol`: data directory, bootstrap opcode, version overrides
//! - `mods`: module directory and autoload behaviour
//! - `logging`: tracing subscriber options

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::Level;

/// Opcode of the client's version-check packet in the stock protocol
pub const VERSION_CHECK_OPCODE: u16 = 72;

/// Largest packet the 2-byte length prefix can describe
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Default upstream connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default silence before an idle connection is dropped
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default drain window on shutdown
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Main proxy configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProxyConfig {
    /// Listener and upstream configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Protocol data and bootstrap configuration
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Module loading configuration
    #[serde(default)]
    pub mods: ModsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProxyConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProxyError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProxyError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProxyError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `GAME_PROXY_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("GAME_PROXY_LISTEN_ADDRESS") {
            self.server.listen_address = addr;
        }

        if let Ok(addr) = std::env::var("GAME_PROXY_UPSTREAM_ADDRESS") {
            self.server.upstream_address = addr;
        }

        if let Ok(timeout) = std::env::var("GAME_PROXY_CONNECT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                self.server.connect_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(version) = std::env::var("GAME_PROXY_PROTOCOL_VERSION") {
            if let Ok(val) = version.parse::<u32>() {
                self.protocol.version = Some(val);
            }
        }

        if let Ok(dir) = std::env::var("GAME_PROXY_DATA_DIR") {
            self.protocol.data_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("GAME_PROXY_MODS_DIR") {
            self.mods.directory = PathBuf::from(dir);
        }
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
            .map_err(|e| ProxyError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProxyError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.protocol.validate());
        errors.extend(self.mods.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProxyError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Listener and upstream configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Address clients connect to (e.g., "127.0.0.1:7777")
    pub listen_address: String,

    /// Real game server the proxy relays to
    pub upstream_address: String,

    /// Timeout for the upstream connect
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Silence in both directions after which the connection is dropped
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Drain window for live connections on shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Maximum number of concurrent relayed connections
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: String::from("127.0.0.1:7777"),
            upstream_address: String::from("127.0.0.1:7778"),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_connections: 64,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.listen_address.is_empty() {
            errors.push("Listen address cannot be empty".to_string());
        } else if self.listen_address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid listen address format: '{}' (expected format: '0.0.0.0:7777')",
                self.listen_address
            ));
        }

        // Upstream may be a hostname, so only check for a port
        if self.upstream_address.is_empty() {
            errors.push("Upstream address cannot be empty".to_string());
        } else if !self
            .upstream_address
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
        {
            errors.push(format!(
                "Invalid upstream address format: '{}' (expected format: 'host:port')",
                self.upstream_address
            ));
        }

        if self.connect_timeout.as_millis() < 100 {
            errors.push("Connect timeout too short (minimum: 100ms)".to_string());
        } else if self.connect_timeout.as_secs() > 300 {
            errors.push("Connect timeout too long (maximum: 300s)".to_string());
        }

        if self.idle_timeout.as_secs() < 1 {
            errors.push("Idle timeout too short (minimum: 1s)".to_string());
        }

        if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        }

        errors
    }
}

/// Protocol data and bootstrap configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
    /// Directory holding `versions.toml`, `maps/` and `definitions/`
    pub data_dir: PathBuf,

    /// Protocol version to assume before any handshake is seen
    #[serde(default)]
    pub version: Option<u32>,

    /// Opcode of the client packet carrying the protocol version
    pub bootstrap_opcode: u16,

    /// Compatibility knob: commit this version on bootstrap instead of
    /// reading it from the version-check payload
    #[serde(default)]
    pub forced_version: Option<u32>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            version: None,
            bootstrap_opcode: VERSION_CHECK_OPCODE,
            forced_version: None,
        }
    }
}

impl ProtocolConfig {
    /// Validate protocol configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.data_dir.as_os_str().is_empty() {
            errors.push("Protocol data directory cannot be empty".to_string());
        }

        if self.version == Some(0) || self.forced_version == Some(0) {
            errors.push("Protocol version 0 is not a valid version".to_string());
        }

        if self.forced_version.is_some() {
            errors.push(
                "WARNING: forced_version is set - protocol version will not be read from the handshake"
                    .to_string(),
            );
        }

        errors
    }
}

/// Module loading configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModsConfig {
    /// Directory scanned for `<name>/module.toml` manifests
    pub directory: PathBuf,

    /// Whether every catalog entry is loaded when a connection starts
    pub autoload: bool,
}

impl Default for ModsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("mods"),
            autoload: true,
        }
    }
}

impl ModsConfig {
    /// Validate module configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.directory.as_os_str().is_empty() {
            errors.push("Module directory cannot be empty".to_string());
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

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("game-proxy"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
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

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
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
