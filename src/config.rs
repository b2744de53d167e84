//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, UplinkError};
use crate::transport::TransportKind;
use crate::uplink::Mode;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub transport: TransportConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub uplink: UplinkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Collector endpoint and I/O timeouts
#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_transport_kind")]
    pub kind: TransportKind,

    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Request path for the duplex (WebSocket) transport
    #[serde(default = "default_ws_path")]
    pub path: String,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

/// Liveness probing and reconnect pacing
#[derive(Debug, Deserialize, Clone)]
pub struct LivenessConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Upper bound for the reconnect delay; equal to `cooldown_ms` means a
    /// fixed delay, larger enables doubling per consecutive failure
    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

/// Offline buffer locations
#[derive(Debug, Deserialize, Clone)]
pub struct BufferConfig {
    #[serde(default = "default_primary_path")]
    pub primary_path: PathBuf,

    #[serde(default = "default_fallback_path")]
    pub fallback_path: PathBuf,
}

/// Delivery behaviour
#[derive(Debug, Deserialize, Clone)]
pub struct UplinkConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,

    #[serde(default = "default_source")]
    pub source: String,

    /// Accuracy threshold the producer applies before submitting
    #[serde(default = "default_max_accuracy_m")]
    pub max_accuracy_m: f32,
}

/// Log output
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for a daily rolling log file; stdout only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// Default value functions
fn default_transport_kind() -> TransportKind { TransportKind::Push }
fn default_port() -> u16 { 5555 }
fn default_ws_path() -> String { "/ws".to_string() }
fn default_connect_timeout_ms() -> u64 { 3000 }
fn default_send_timeout_ms() -> u64 { 3000 }
fn default_probe_timeout_ms() -> u64 { 2000 }

fn default_interval_ms() -> u64 { 5000 }
fn default_cooldown_ms() -> u64 { 2000 }
fn default_max_cooldown_ms() -> u64 { 2000 }

fn default_primary_path() -> PathBuf { PathBuf::from("./data/service_data.json") }
fn default_fallback_path() -> PathBuf { PathBuf::from("./data/service_backup.json") }

fn default_mode() -> Mode { Mode::Online }
fn default_source() -> String { "LocationTrackingService".to_string() }
fn default_max_accuracy_m() -> f32 { 100.0 }

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            cooldown_ms: default_cooldown_ms(),
            max_cooldown_ms: default_max_cooldown_ms(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            primary_path: default_primary_path(),
            fallback_path: default_fallback_path(),
        }
    }
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            source: default_source(),
            max_accuracy_m: default_max_accuracy_m(),
        }
    }
}

impl TransportConfig {
    /// Endpoint URL for the configured wire protocol
    ///
    /// `ws://host:port/path` for duplex, `tcp://host:port` for push.
    pub fn url(&self) -> String {
        match self.kind {
            TransportKind::Duplex => format!("ws://{}:{}{}", self.host, self.port, self.path),
            TransportKind::Push => format!("tcp://{}:{}", self.host, self.port),
        }
    }

    /// `host:port` for socket APIs
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration { Duration::from_millis(self.connect_timeout_ms) }
    pub fn send_timeout(&self) -> Duration { Duration::from_millis(self.send_timeout_ms) }
    pub fn probe_timeout(&self) -> Duration { Duration::from_millis(self.probe_timeout_ms) }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use telemetry_uplink::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.transport.host.trim().is_empty() {
            return Err(invalid("transport host cannot be empty"));
        }

        if self.transport.port == 0 {
            return Err(invalid("transport port must be non-zero"));
        }

        if self.transport.kind == TransportKind::Duplex && !self.transport.path.starts_with('/') {
            return Err(invalid("transport path must start with '/'"));
        }

        for (name, value) in [
            ("connect_timeout_ms", self.transport.connect_timeout_ms),
            ("send_timeout_ms", self.transport.send_timeout_ms),
            ("probe_timeout_ms", self.transport.probe_timeout_ms),
        ] {
            if value == 0 || value > 60000 {
                return Err(invalid(format!("{} must be between 1 and 60000", name)));
            }
        }

        if self.liveness.interval_ms == 0 || self.liveness.interval_ms > 600_000 {
            return Err(invalid("liveness interval_ms must be between 1 and 600000"));
        }

        if self.liveness.cooldown_ms == 0 || self.liveness.cooldown_ms > 600_000 {
            return Err(invalid("liveness cooldown_ms must be between 1 and 600000"));
        }

        if self.liveness.max_cooldown_ms < self.liveness.cooldown_ms {
            return Err(invalid("liveness max_cooldown_ms must be >= cooldown_ms"));
        }

        if self.buffer.primary_path.as_os_str().is_empty()
            || self.buffer.fallback_path.as_os_str().is_empty()
        {
            return Err(invalid("buffer paths cannot be empty"));
        }

        if self.buffer.primary_path == self.buffer.fallback_path {
            return Err(invalid("buffer primary_path and fallback_path must differ"));
        }

        if self.uplink.source.is_empty() {
            return Err(invalid("uplink source cannot be empty"));
        }

        if !(self.uplink.max_accuracy_m > 0.0) {
            return Err(invalid("uplink max_accuracy_m must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> UplinkError {
    UplinkError::Config(toml::de::Error::custom(msg))
}
