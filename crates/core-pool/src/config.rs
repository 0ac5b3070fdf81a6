//! Pool configuration

use crate::backoff::{BackoffConfig, DEFAULT_MULTIPLIER, DEFAULT_RANDOMIZATION_FACTOR};
use crate::clock::{Clock, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// Default value for [`PoolConfig::max_conns_per_server`]
pub const DEFAULT_MAX_CONNS_PER_SERVER: usize = 1;

/// Default value for [`PoolConfig::max_rps`]
pub const DEFAULT_MAX_RPS: u32 = 100;

/// Default value for [`PoolConfig::connect_timeout`]
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default value for [`PoolConfig::initial_backoff`]
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Default value for [`PoolConfig::max_backoff`]
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Default value for [`PoolConfig::capacity_retry_interval`]
pub const DEFAULT_CAPACITY_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration shared by the pool and every server it registers
///
/// Zero values are replaced by the `DEFAULT_*` constants when the pool is
/// created (see [`PoolConfig::with_defaults`]).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of open connections (idle or in use) per server
    pub max_conns_per_server: usize,
    /// Maximum number of acquisition attempts per server per second.
    ///
    /// This paces `open_conn` calls, not the traffic sent over a connection.
    pub max_rps: u32,
    /// Maximum time a single dial may take
    pub connect_timeout: Duration,
    /// First backoff interval after a server goes down
    pub initial_backoff: Duration,
    /// Ceiling of the backoff interval
    pub max_backoff: Duration,
    /// Growth factor of the backoff interval
    pub backoff_multiplier: f64,
    /// Jitter of the backoff interval; use 0.0 for a deterministic sequence
    pub backoff_randomization: f64,
    /// Wait suggested when a server is only at capacity
    pub capacity_retry_interval: Duration,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_conns_per_server: DEFAULT_MAX_CONNS_PER_SERVER,
            max_rps: DEFAULT_MAX_RPS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_multiplier: DEFAULT_MULTIPLIER,
            backoff_randomization: DEFAULT_RANDOMIZATION_FACTOR,
            capacity_retry_interval: DEFAULT_CAPACITY_RETRY_INTERVAL,
            clock: Arc::new(SystemClock),
        }
    }
}

impl PoolConfig {
    /// Return a copy with every unset (zero) field replaced by its default
    ///
    /// A multiplier below 1 or not finite, and a randomization outside
    /// `[0, 1)`, count as unset.
    pub fn with_defaults(mut self) -> Self {
        if self.max_conns_per_server == 0 {
            self.max_conns_per_server = DEFAULT_MAX_CONNS_PER_SERVER;
        }
        if self.max_rps == 0 {
            self.max_rps = DEFAULT_MAX_RPS;
        }
        if self.connect_timeout.is_zero() {
            self.connect_timeout = DEFAULT_CONNECT_TIMEOUT;
        }
        if self.initial_backoff.is_zero() {
            self.initial_backoff = DEFAULT_INITIAL_BACKOFF;
        }
        if self.max_backoff.is_zero() {
            self.max_backoff = DEFAULT_MAX_BACKOFF;
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            self.backoff_multiplier = DEFAULT_MULTIPLIER;
        }
        if !(0.0..1.0).contains(&self.backoff_randomization) {
            self.backoff_randomization = DEFAULT_RANDOMIZATION_FACTOR;
        }
        if self.capacity_retry_interval.is_zero() {
            self.capacity_retry_interval = DEFAULT_CAPACITY_RETRY_INTERVAL;
        }
        self
    }

    /// Minimum spacing between two acquisition attempts on one server
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / u64::from(self.max_rps.max(1)))
    }

    /// Backoff parameters derived from this configuration
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: self.backoff_multiplier,
            randomization_factor: self.backoff_randomization,
        }
    }
}
