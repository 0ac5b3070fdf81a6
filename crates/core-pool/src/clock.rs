//! Time source used by servers and the pool
//!
//! Everything time dependent (pacing, backoff deadlines, retry waits, connect
//! timeouts) goes through [`Clock`], so tests can drive time by hand with
//! [`ManualClock`].

use std::fmt::Debug;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Abstraction over wall-clock reads and cancellable delays
#[async_trait::async_trait]
pub trait Clock: Send + Sync + Debug + 'static {
    /// Current time
    fn now(&self) -> Instant;

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    fn elapsed_since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }

    /// Complete once `duration` has passed on this clock.
    ///
    /// Dropping the future cancels the wait.
    async fn delay(&self, duration: Duration);
}

/// Clock backed by `tokio::time`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn delay(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when told to
///
/// # Example
/// ```
/// use fleetpool_core::clock::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(clock.elapsed_since(start), Duration::from_secs(5));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: watch::Sender<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        let (offset, _) = watch::channel(Duration::ZERO);
        Self {
            origin: Instant::now(),
            offset,
        }
    }

    /// Move time forward, waking every delay whose deadline has passed
    pub fn advance(&self, by: Duration) {
        self.offset.send_modify(|offset| *offset += by);
    }

    /// Total time advanced since creation
    pub fn elapsed(&self) -> Duration {
        *self.offset.borrow()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.borrow()
    }

    async fn delay(&self, duration: Duration) {
        let mut offset = self.offset.subscribe();
        let deadline = *offset.borrow_and_update() + duration;

        loop {
            let current = *offset.borrow_and_update();
            if current >= deadline || offset.changed().await.is_err() {
                return;
            }
        }
    }
}
