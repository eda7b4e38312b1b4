//! # Configuration Management
//!
//! Optional configuration surface for processes embedding the server.
//!
//! The core types ([`Server`](crate::transport::server::Server),
//! [`ObjectSpace`](crate::service::object_space::ObjectSpace)) never read
//! configuration on their own; they receive fully formed collaborators.
//! This module exists for the bootstrap layer.
//!
//! ## Configuration Sources
//! - TOML files via [`RemoteConfig::from_file`]
//! - Environment variables via [`RemoteConfig::from_env`]
//! - Direct instantiation with defaults

use crate::core::serialization::SerializationFormat;
use crate::error::{RemoteError, Result};
use crate::utils::compression::CompressionKind;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Current supported protocol version
pub const PROTOCOL_VERSION: u8 = 1;

/// Magic bytes opening every frame ("RSPC")
pub const MAGIC_BYTES: [u8; 4] = [0x52, 0x53, 0x50, 0x43];

/// Max allowed payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8233;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RemoteConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RemoteConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RemoteError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| RemoteError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `REMOTE_SPACE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("REMOTE_SPACE_HOST") {
            config.server.host = host;
        }

        if let Ok(port) = std::env::var("REMOTE_SPACE_PORT") {
            config.server.port = port
                .parse::<u16>()
                .map_err(|e| RemoteError::ConfigError(format!("Invalid REMOTE_SPACE_PORT: {e}")))?;
        }

        if let Ok(workers) = std::env::var("REMOTE_SPACE_WORKERS") {
            if let Ok(val) = workers.parse::<usize>() {
                config.executor.workers = val;
            }
        }

        if let Ok(idle) = std::env::var("REMOTE_SPACE_IDLE_TIMEOUT_MS") {
            if let Ok(val) = idle.parse::<u64>() {
                config.server.idle_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(format) = std::env::var("REMOTE_SPACE_FORMAT") {
            config.transport.format = match format.to_lowercase().as_str() {
                "bincode" => SerializationFormat::Bincode,
                "json" => SerializationFormat::Json,
                "messagepack" | "msgpack" => SerializationFormat::MessagePack,
                other => {
                    return Err(RemoteError::ConfigError(format!(
                        "Unknown serialization format: {other}"
                    )))
                }
            };
        }

        Ok(config)
    }

    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| RemoteError::ConfigError(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| RemoteError::ConfigError(format!("Failed to write config file: {e}")))?;
        Ok(())
    }

    /// Collect every validation problem. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.executor.validate());
        errors.extend(self.logging.validate());
        errors
    }

    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RemoteError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Interface to listen on
    pub host: String,

    /// TCP port, 1-65535
    pub port: u16,

    /// Connections above this count are closed at accept time
    pub max_connections: usize,

    /// Close a connection after this long without an inbound frame
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Upper bound on how long `stop()` waits for connections to wind down
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Disable Nagle's algorithm on accepted sockets
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: DEFAULT_PORT,
            max_connections: 1000,
            idle_timeout: timeout::IDLE_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
            tcp_nodelay: true,
        }
    }
}

impl ServerConfig {
    /// `host:port` as handed to the listener
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.host.is_empty() {
            errors.push("Server host cannot be empty".to_string());
        } else if self.host.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid server host: '{}' (expected an IP address such as '0.0.0.0')",
                self.host
            ));
        }

        if self.port == 0 {
            errors.push("Server port must be between 1 and 65535".to_string());
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.idle_timeout.as_millis() < 100 {
            errors.push("Idle timeout too short (minimum: 100ms)".to_string());
        }

        if self.shutdown_timeout.as_millis() < 100 {
            errors.push("Shutdown timeout too short (minimum: 100ms)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Serialization format shared by every connection
    #[serde(with = "format_serde")]
    pub format: SerializationFormat,

    /// Compress outbound payloads; `None` sends them as-is
    #[serde(default)]
    pub compression: Option<CompressionKind>,

    /// Zstd level, ignored for LZ4
    pub compression_level: i32,

    /// Payloads smaller than this bypass compression
    pub compression_threshold_bytes: usize,

    /// Maximum allowed payload size in bytes
    pub max_payload_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            format: SerializationFormat::Bincode,
            compression: None,
            compression_level: 3,
            compression_threshold_bytes: 512,
            max_payload_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_payload_size < 1024 {
            errors.push("Max payload size too small (minimum: 1 KB)".to_string());
        } else if self.max_payload_size > MAX_PAYLOAD_SIZE {
            errors.push(format!(
                "Max payload size too large: {} bytes (maximum: {MAX_PAYLOAD_SIZE})",
                self.max_payload_size
            ));
        }

        if self.compression == Some(CompressionKind::Zstd)
            && (self.compression_level < 1 || self.compression_level > 22)
        {
            errors.push(format!(
                "Invalid compression level: {} (valid range: 1-22)",
                self.compression_level
            ));
        }

        if self.compression.is_some() && self.compression_threshold_bytes > self.max_payload_size {
            errors.push("Compression threshold cannot be larger than max payload size".to_string());
        }

        errors
    }
}

/// Worker pool sizing. `workers == 0` runs every invocation on the
/// connection's read task.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    pub workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { workers: 16 }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.workers > 4096 {
            errors.push(format!(
                "Worker count too large: {} (maximum: 4096)",
                self.workers
            ));
        }
        errors
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub app_name: String,

    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub log_to_file: bool,

    /// Required when `log_to_file` is set
    pub log_file_path: Option<String>,

    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("remote-space"),
            log_level: Level::INFO,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
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
            match self.log_file_path {
                Some(ref path) => {
                    if let Some(parent) = Path::new(path).parent() {
                        if !parent.as_os_str().is_empty() && !parent.exists() {
                            errors.push(format!(
                                "Log file directory does not exist: {}",
                                parent.display()
                            ));
                        }
                    }
                }
                None => errors
                    .push("log_file_path must be specified when log_to_file is true".to_string()),
            }
        }

        errors
    }
}

/// Durations as integer milliseconds
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod format_serde {
    use crate::core::serialization::SerializationFormat;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(format: &SerializationFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        format.name().to_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SerializationFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        match name.to_lowercase().as_str() {
            "bincode" => Ok(SerializationFormat::Bincode),
            "json" => Ok(SerializationFormat::Json),
            "messagepack" | "msgpack" => Ok(SerializationFormat::MessagePack),
            other => Err(serde::de::Error::custom(format!(
                "Unknown serialization format: {other}"
            ))),
        }
    }
}

mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_lowercase().serialize(serializer)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_toml_partial_override() {
        let config = RemoteConfig::from_toml(
            r#"
            [server]
            host = "127.0.0.1"
            port = 9001
            max_connections = 10
            idle_timeout = 2000
            shutdown_timeout = 1000
            tcp_nodelay = false

            [transport]
            format = "messagepack"
            compression = "zstd"
            compression_level = 5
            compression_threshold_bytes = 256
            max_payload_size = 65536
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.idle_timeout, Duration::from_secs(2));
        assert_eq!(config.transport.format, SerializationFormat::MessagePack);
        assert_eq!(config.transport.compression, Some(CompressionKind::Zstd));
        assert_eq!(config.executor.workers, ExecutorConfig::default().workers);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_example_config_parses_back() {
        let text = RemoteConfig::example_config();
        let parsed = RemoteConfig::from_toml(&text);
        assert!(parsed.is_ok(), "example config must parse: {text}");
    }

    #[test]
    fn test_address_formatting() {
        let server = ServerConfig {
            host: "127.0.0.1".into(),
            port: 9001,
            ..ServerConfig::default()
        };
        assert_eq!(server.address(), "127.0.0.1:9001");
    }
}
