//! Configuration Module
//!
//! Provides TOML-based configuration for the gateway with support for:
//! - CAN interface selection
//! - Broker connection settings (address, credentials, keep alive)
//! - Gateway behaviour (topic namespace, direction flags, QoS)
//! - Environment variable overrides (CANMQ_* prefix)

use std::path::Path;
use std::time::Duration;

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests;

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Config crate error
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Logging configuration
    pub log: LogConfig,
    /// CAN interface configuration
    pub can: CanConfig,
    /// Broker connection configuration
    pub broker: BrokerConfig,
    /// Gateway behaviour configuration
    pub gateway: GatewayConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// CAN interface configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CanConfig {
    /// Name of the SocketCAN interface to bind, e.g. "can0" or "vcan0"
    #[serde(default = "default_interface")]
    pub interface: String,
}

fn default_interface() -> String {
    "can0".to_string()
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
        }
    }
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker hostname or IP address
    #[serde(default = "default_host")]
    pub host: String,
    /// Broker TCP port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username for broker authentication
    pub username: Option<String>,
    /// Password for broker authentication
    pub password: Option<String>,
    /// Client identifier; defaults to "canmq-<pid>"
    pub client_id: Option<String>,
    /// Keep alive interval in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u16,
    /// Initial reconnect interval in seconds
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval: u64,
    /// Maximum reconnect interval in seconds (backoff cap)
    #[serde(default = "default_max_reconnect_interval")]
    pub max_reconnect_interval: u64,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}
fn default_port() -> u16 {
    1883
}
fn default_keepalive() -> u16 {
    20
}
fn default_reconnect_interval() -> u64 {
    5
}
fn default_max_reconnect_interval() -> u64 {
    60
}
fn default_connect_timeout() -> u64 {
    30
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: None,
            password: None,
            client_id: None,
            keepalive: default_keepalive(),
            reconnect_interval: default_reconnect_interval(),
            max_reconnect_interval: default_max_reconnect_interval(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl BrokerConfig {
    /// Client id to present to the broker
    pub fn effective_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("canmq-{}", std::process::id()))
    }

    /// Get reconnect interval as Duration
    pub fn reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval)
    }

    /// Get max reconnect interval as Duration
    pub fn max_reconnect_interval_duration(&self) -> Duration {
        Duration::from_secs(self.max_reconnect_interval)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }
}

/// Gateway behaviour configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Topic namespace prefix; defaults to "can/<hostname>/<interface>"
    pub topic_prefix: Option<String>,
    /// Publish frames read from the bus
    #[serde(default = "default_true")]
    pub read: bool,
    /// Write frames received as commands onto the bus
    #[serde(default = "default_true")]
    pub write: bool,
    /// QoS for telemetry publishes (0 or 1)
    #[serde(default)]
    pub qos: u8,
    /// Retain flag for telemetry publishes
    #[serde(default)]
    pub retain: bool,
    /// Maximum pending loopback suppression entries
    #[serde(default = "default_suppression_capacity")]
    pub suppression_capacity: usize,
}

fn default_true() -> bool {
    true
}
fn default_suppression_capacity() -> usize {
    crate::suppress::DEFAULT_CAPACITY
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            topic_prefix: None,
            read: true,
            write: true,
            qos: 0,
            retain: false,
            suppression_capacity: default_suppression_capacity(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax in the TOML file
    /// 2. Override via env vars: `CANMQ__` prefix with double underscores for nesting:
    ///    - `CANMQ__CAN__INTERFACE=vcan0` overrides `can.interface`
    ///    - `CANMQ__BROKER__HOST=10.0.0.2` overrides `broker.host`
    ///    - `CANMQ__GATEWAY__WRITE=false` overrides `gateway.write`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            // Start with defaults
            .set_default("log.level", "info")?
            .set_default("can.interface", "can0")?
            .set_default("broker.host", "localhost")?
            .set_default("broker.port", 1883)?
            .set_default("broker.keepalive", 20)?
            .set_default("broker.reconnect_interval", 5)?
            .set_default("broker.max_reconnect_interval", 60)?
            .set_default("broker.connect_timeout", 30)?
            .set_default("gateway.read", true)?
            .set_default("gateway.write", true)?
            .set_default("gateway.qos", 0)?
            .set_default("gateway.retain", false)?
            .set_default(
                "gateway.suppression_capacity",
                crate::suppress::DEFAULT_CAPACITY as u64,
            )?;

        // Load from file with env var substitution
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let substituted = substitute_env_vars(&content);
                builder = builder.add_source(File::from_str(&substituted, FileFormat::Toml));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // File doesn't exist, use defaults
            }
            Err(e) => return Err(ConfigError::Io(e)),
        }

        // Override with environment variables (CANMQ__BROKER__HOST, etc.)
        // Double underscore separates nested keys, single underscore preserved in field names
        let cfg = builder
            .add_source(
                Environment::with_prefix("CANMQ")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides only (no file).
    ///
    /// Useful for containerized deployments where all config comes from env vars.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Path::new(""))
    }

    /// Parse configuration from a string (for testing, no env var support)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.can.interface.is_empty() {
            return Err(ConfigError::Validation(
                "can.interface must not be empty".to_string(),
            ));
        }

        if self.gateway.qos > 1 {
            return Err(ConfigError::Validation(
                "gateway.qos must be 0 or 1".to_string(),
            ));
        }

        if self.gateway.suppression_capacity == 0 {
            return Err(ConfigError::Validation(
                "gateway.suppression_capacity must be at least 1".to_string(),
            ));
        }

        if !self.gateway.read && !self.gateway.write {
            return Err(ConfigError::Validation(
                "at least one of gateway.read and gateway.write must be enabled".to_string(),
            ));
        }

        if let Some(ref prefix) = self.gateway.topic_prefix {
            if prefix.is_empty() || prefix.ends_with('/') {
                return Err(ConfigError::Validation(
                    "gateway.topic_prefix must be non-empty and not end with '/'".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Topic namespace prefix, resolving the hostname-based default.
    pub fn topic_prefix(&self) -> String {
        if let Some(ref prefix) = self.gateway.topic_prefix {
            return prefix.clone();
        }

        let host = match hostname::get() {
            Ok(name) => name.to_string_lossy().to_lowercase(),
            Err(e) => {
                warn!("Failed to resolve hostname, using \"localhost\": {}", e);
                "localhost".to_string()
            }
        };

        format!("can/{}/{}", host, self.can.interface)
    }
}
