//! Round-robin pool over a fleet of servers

use crate::config::PoolConfig;
use crate::conn::PooledConn;
use crate::containers::RoundRobin;
use crate::dialer::Dialer;
use crate::error::{PoolError, Result};
use crate::server::{Server, ServerStats};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Outcome of a sweep in which no server produced a connection
struct SweepFailure {
    error: PoolError,
    /// Shortest advisory wait reported by the servers visited
    retry_after: Duration,
}

/// Connection pool spreading acquisitions over registered servers
///
/// # Example
/// ```no_run
/// use fleetpool_core::{ConnPool, PoolConfig};
/// # use fleetpool_core::Dialer;
/// # async fn example<D: Dialer>(dialer: D) -> fleetpool_core::Result<()> {
/// let mut pool = ConnPool::new(PoolConfig::default(), dialer);
/// pool.register_server("10.0.0.1:6379");
/// pool.register_server("10.0.0.2:6379");
///
/// let cancel = tokio_util::sync::CancellationToken::new();
/// let mut conn = pool.open_conn(&cancel).await?;
/// // ... use the connection ...
/// conn.return_to_pool().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConnPool<D: Dialer> {
    config: PoolConfig,
    dialer: Arc<D>,
    servers: RoundRobin<Arc<Server<D>>>,
}

impl<D: Dialer> std::fmt::Debug for ConnPool<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnPool")
            .field("config", &self.config)
            .field("servers", &self.addresses())
            .finish_non_exhaustive()
    }
}

impl<D: Dialer> ConnPool<D> {
    /// Create an empty pool; unset configuration values get their defaults
    pub fn new(config: PoolConfig, dialer: D) -> Self {
        Self {
            config: config.with_defaults(),
            dialer: Arc::new(dialer),
            servers: RoundRobin::new(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Add a server to the rotation
    ///
    /// Takes `&mut self`: registration happens before the pool is shared.
    pub fn register_server(&mut self, address: impl Into<String>) {
        let server = Server::new(address, &self.config, Arc::clone(&self.dialer));
        debug!(address = %server.address(), "registered server");
        self.servers.push(Arc::new(server));
    }

    /// Number of registered servers
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Registered addresses in registration order
    pub fn addresses(&self) -> Vec<&str> {
        self.servers.iter().map(|s| s.address()).collect()
    }

    /// Try every server once, starting one past the previous sweep's start
    ///
    /// Never waits for anything but a single dial per server. Failures are
    /// aggregated: [`PoolError::AllServersDown`],
    /// [`PoolError::AllServersRateLimited`] or [`PoolError::PartiallyDown`].
    pub async fn open_conn_non_block(&self, cancel: &CancellationToken) -> Result<PooledConn<D>> {
        self.sweep(cancel).await.map_err(|failure| failure.error)
    }

    /// Keep sweeping until a connection is available or `cancel` fires
    ///
    /// Between sweeps the shortest wait suggested by the servers is slept on
    /// the pool clock. [`PoolError::NoServersRegistered`] and
    /// [`PoolError::Cancelled`] are returned immediately; any other error
    /// that is not a down/ratelimited aggregate ends the loop as well.
    pub async fn open_conn(&self, cancel: &CancellationToken) -> Result<PooledConn<D>> {
        loop {
            let failure = match self.sweep(cancel).await {
                Ok(conn) => return Ok(conn),
                Err(failure) => failure,
            };

            if !is_retryable_sweep_error(&failure.error) {
                return Err(failure.error);
            }

            info!(
                error = %failure.error,
                retry_after = ?failure.retry_after,
                "can't get connection, retrying"
            );

            if failure.retry_after.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(PoolError::Cancelled),
                _ = self.config.clock.delay(failure.retry_after) => {}
            }
        }
    }

    /// [`ConnPool::open_conn`] bounded by `timeout` on the pool clock
    ///
    /// On expiry the attempt is cancelled and [`PoolError::Cancelled`] is
    /// returned, unless a connection was obtained in the meantime.
    pub async fn open_conn_within(
        &self,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Result<PooledConn<D>> {
        let attempt = cancel.child_token();
        let open = self.open_conn(&attempt);
        tokio::pin!(open);

        tokio::select! {
            result = &mut open => result,
            _ = self.config.clock.delay(timeout) => {
                debug!(?timeout, "connection wait timed out");
                attempt.cancel();
                open.await
            }
        }
    }

    /// Snapshot of every server, in registration order
    pub async fn stats(&self) -> Vec<ServerStats> {
        let mut stats = Vec::with_capacity(self.servers.len());
        for server in self.servers.iter() {
            stats.push(server.stats().await);
        }
        stats
    }

    async fn sweep(&self, cancel: &CancellationToken) -> std::result::Result<PooledConn<D>, SweepFailure> {
        if self.servers.is_empty() {
            return Err(SweepFailure {
                error: PoolError::NoServersRegistered,
                retry_after: Duration::ZERO,
            });
        }

        let mut down = 0usize;
        let mut limited = 0usize;
        let mut min_wait: Option<Duration> = None;

        for server in self.servers.sweep() {
            if cancel.is_cancelled() {
                return Err(SweepFailure {
                    error: PoolError::Cancelled,
                    retry_after: Duration::ZERO,
                });
            }

            let error = match server.acquire(cancel).await {
                Ok(conn) => return Ok(conn),
                Err(error) => error,
            };

            match error {
                PoolError::ServerDown { .. } => down += 1,
                PoolError::RateLimited { .. } => limited += 1,
                other => {
                    return Err(SweepFailure {
                        error: other,
                        retry_after: Duration::ZERO,
                    })
                }
            }

            let wait = server.retry_timeout().await;
            min_wait = Some(min_wait.map_or(wait, |current| current.min(wait)));
        }

        let retry_after = min_wait.unwrap_or_default();
        let error = match (down, limited) {
            (_, 0) => PoolError::AllServersDown { retry_after },
            (0, _) => PoolError::AllServersRateLimited { retry_after },
            _ => PoolError::PartiallyDown { retry_after },
        };

        Err(SweepFailure { error, retry_after })
    }
}

fn is_retryable_sweep_error(error: &PoolError) -> bool {
    matches!(
        error,
        PoolError::AllServersDown { .. }
            | PoolError::AllServersRateLimited { .. }
            | PoolError::PartiallyDown { .. }
    )
}
