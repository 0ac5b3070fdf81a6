//! Exponential backoff for servers that failed to dial
//!
//! Produces a non-decreasing sequence of retry intervals: it starts at the
//! initial interval, grows by a fixed multiplier per failure and is capped at
//! the maximum interval. Each value may be jittered by the randomization
//! factor; with a zero factor the sequence is exact:
//!
//! ```
//! use fleetpool_core::backoff::{BackoffConfig, ExponentialBackoff};
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(BackoffConfig {
//!     initial_interval: Duration::from_secs(60),
//!     max_interval: Duration::from_secs(300),
//!     multiplier: 1.5,
//!     randomization_factor: 0.0,
//! });
//!
//! let gaps: Vec<Duration> = backoff.by_ref().take(6).collect();
//! assert_eq!(gaps[0], Duration::from_secs(60));
//! assert_eq!(gaps[3], Duration::from_millis(202_500));
//! assert_eq!(gaps[5], Duration::from_secs(300));
//!
//! backoff.reset();
//! assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
//! ```

use std::time::Duration;

/// Default growth factor between two successive intervals
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Default jitter applied around each interval (±50%)
pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

/// Parameters of an exponential backoff sequence
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// First interval of every failure episode
    pub initial_interval: Duration,
    /// Ceiling for the un-jittered interval
    pub max_interval: Duration,
    /// Growth factor applied after each interval
    pub multiplier: f64,
    /// Each value is drawn from `[interval * (1 - f), interval * (1 + f)]`
    pub randomization_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
            multiplier: DEFAULT_MULTIPLIER,
            randomization_factor: DEFAULT_RANDOMIZATION_FACTOR,
        }
    }
}

/// Stateful exponential backoff generator
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial_interval;
        Self { config, current }
    }

    /// Return the next retry interval and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let value = randomize(
            self.current,
            self.config.randomization_factor,
            self.config.max_interval,
        );
        self.increment();
        value
    }

    /// Start a new failure episode from the initial interval
    pub fn reset(&mut self) {
        self.current = self.config.initial_interval;
    }

    /// Un-jittered interval the next call will be based on
    pub fn current_interval(&self) -> Duration {
        self.current
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    fn increment(&mut self) {
        let max = self.config.max_interval;
        self.current =
            Duration::try_from_secs_f64(self.current.as_secs_f64() * self.config.multiplier)
                .ok()
                .filter(|next| *next < max)
                .unwrap_or(max);
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        Some(self.next_backoff())
    }
}

/// Jitter `interval`; values that don't fit a `Duration` become `fallback`
fn randomize(interval: Duration, factor: f64, fallback: Duration) -> Duration {
    if factor <= 0.0 {
        return interval;
    }

    let secs = interval.as_secs_f64();
    let delta = factor * secs;
    let low = (secs - delta).max(0.0);
    let high = secs + delta;

    Duration::try_from_secs_f64(low + rand::random::<f64>() * (high - low)).unwrap_or(fallback)
}
