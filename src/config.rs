//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::relay::RelayOptions;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_relay")]
    pub relay: RelayOptions,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_relay() -> RelayOptions {
    RelayOptions::new().keep_alive(2.0).retry_delay(2000)
}

/// Pub/sub bus endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_bus_host")]
    pub host: String,

    #[serde(default = "default_bus_port")]
    pub port: u16,
}

fn default_bus_host() -> String {
    "127.0.0.1".to_string()
}

fn default_bus_port() -> u16 {
    5556
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: default_bus_host(),
            port: default_bus_port(),
        }
    }
}

impl BusConfig {
    /// ZeroMQ endpoint of the publisher
    pub fn endpoint(&self) -> String {
        format!("tcp://{}:{}", self.host, self.port)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8085
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Whether JSON log output was requested
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `SSE_RELAY_CONFIG`, the default locations, or the environment
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("SSE_RELAY_CONFIG") {
            return Self::load_with_env(Path::new(&path));
        }

        // Try default config locations
        let config_paths = [
            dirs::config_dir().map(|p| p.join("sse-relay").join("config.toml")),
            Some(PathBuf::from("/etc/sse-relay/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Check that the relay options are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.relay
            .validate()
            .map(|_| ())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        // Relay overrides
        if let Some(keep_alive) = env_parse::<f64>("SSE_RELAY_KEEP_ALIVE")? {
            self.relay.keep_alive = Some(keep_alive);
        }
        if let Some(retry_delay) = env_parse::<i64>("SSE_RELAY_RETRY_DELAY")? {
            self.relay.retry_delay = Some(retry_delay);
        }

        // Bus overrides
        if let Ok(host) = std::env::var("SSE_RELAY_BUS_HOST") {
            self.bus.host = host;
        }
        if let Some(port) = env_parse::<u16>("SSE_RELAY_BUS_PORT")? {
            self.bus.port = port;
        }

        // API overrides
        if let Ok(host) = std::env::var("SSE_RELAY_API_HOST") {
            self.api.host = host;
        }
        if let Some(port) = env_parse::<u16>("SSE_RELAY_API_PORT")? {
            self.api.port = port;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("SSE_RELAY_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SSE_RELAY_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay: default_relay(),
            bus: BusConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env {
                name: name.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid value for {name}: {value:?}")]
    Env { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# SSE Relay Configuration
#
# Environment variables override these settings:
# - SSE_RELAY_KEEP_ALIVE
# - SSE_RELAY_RETRY_DELAY
# - SSE_RELAY_BUS_HOST
# - SSE_RELAY_BUS_PORT
# - SSE_RELAY_API_HOST
# - SSE_RELAY_API_PORT
# - SSE_RELAY_LOG_LEVEL
# - SSE_RELAY_LOG_FORMAT

[relay]
# Seconds of idle time before a heartbeat comment is sent (remove to disable)
keep_alive = 2.0

# Client reconnection delay in milliseconds (remove to disable the retry hint)
retry_delay = 2000

[bus]
# Host of the ZeroMQ publisher
host = "127.0.0.1"

# Port of the ZeroMQ publisher
port = 5556

[api]
# HTTP server host
host = "0.0.0.0"

# HTTP server port
port = 8085

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
