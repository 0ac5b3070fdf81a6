/*!
 * Configuration for Fleetpool
 */

use fleetpool_core::config as pool_defaults;
use fleetpool_core::PoolConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FleetError, Result};

/// Pool settings as read from a TOML file
///
/// ```toml
/// servers = ["10.0.0.1:11211", "10.0.0.2:11211"]
/// max_conns_per_server = 4
/// max_rps = 50
/// connect_timeout_ms = 2000
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Server addresses, registered in this order
    #[serde(default)]
    pub servers: Vec<String>,

    /// Maximum open connections per server
    #[serde(default = "default_max_conns_per_server")]
    pub max_conns_per_server: usize,

    /// Maximum acquisition attempts per server per second
    #[serde(default = "default_max_rps")]
    pub max_rps: u32,

    /// Dial timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// First backoff interval after a failed dial, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor of the backoff interval
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Backoff jitter in [0, 1); 0 makes the sequence deterministic
    #[serde(default = "default_backoff_randomization")]
    pub backoff_randomization: f64,

    /// Wait suggested when a server has no free slot, in milliseconds
    #[serde(default = "default_capacity_retry_interval_ms")]
    pub capacity_retry_interval_ms: u64,

    /// Disable Nagle's algorithm on dialed TCP connections
    #[serde(default = "default_true")]
    pub tcp_nodelay: bool,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            max_conns_per_server: default_max_conns_per_server(),
            max_rps: default_max_rps(),
            connect_timeout_ms: default_connect_timeout_ms(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            backoff_randomization: default_backoff_randomization(),
            capacity_retry_interval_ms: default_capacity_retry_interval_ms(),
            tcp_nodelay: default_true(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Where and how much to log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LoggingSettings {
    /// Minimum level, overridden by `RUST_LOG`
    #[serde(default)]
    pub level: LogLevel,

    /// Log as JSON to this file instead of stdout
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_max_conns_per_server() -> usize {
    pool_defaults::DEFAULT_MAX_CONNS_PER_SERVER
}

fn default_max_rps() -> u32 {
    pool_defaults::DEFAULT_MAX_RPS
}

fn default_connect_timeout_ms() -> u64 {
    pool_defaults::DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

fn default_initial_backoff_ms() -> u64 {
    pool_defaults::DEFAULT_INITIAL_BACKOFF.as_millis() as u64
}

fn default_max_backoff_ms() -> u64 {
    pool_defaults::DEFAULT_MAX_BACKOFF.as_millis() as u64
}

fn default_backoff_multiplier() -> f64 {
    fleetpool_core::backoff::DEFAULT_MULTIPLIER
}

fn default_backoff_randomization() -> f64 {
    fleetpool_core::backoff::DEFAULT_RANDOMIZATION_FACTOR
}

fn default_capacity_retry_interval_ms() -> u64 {
    pool_defaults::DEFAULT_CAPACITY_RETRY_INTERVAL.as_millis() as u64
}

impl PoolSettings {
    /// Load settings from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse settings from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save settings to a TOML file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| FleetError::Config(format!("Failed to serialize settings: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the pool can't run with
    pub fn validate(&self) -> Result<()> {
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(FleetError::Config(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }

        if !(0.0..1.0).contains(&self.backoff_randomization) {
            return Err(FleetError::Config(format!(
                "backoff_randomization must be in [0, 1), got {}",
                self.backoff_randomization
            )));
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(FleetError::Config(format!(
                "backoff_multiplier must be finite and at least 1, got {}",
                self.backoff_multiplier
            )));
        }

        Ok(())
    }

    /// Pool configuration on the system clock
    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_conns_per_server: self.max_conns_per_server,
            max_rps: self.max_rps,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
            backoff_randomization: self.backoff_randomization,
            capacity_retry_interval: Duration::from_millis(self.capacity_retry_interval_ms),
            ..Default::default()
        }
    }
}
