/*!
 * Fleetpool - outbound connection pool for server fleets
 *
 * Hands out TCP connections spread over a list of interchangeable servers:
 * - Per-server request pacing and connection cap
 * - FIFO reuse of returned connections
 * - Exponential backoff for servers that fail to accept connections
 * - Round-robin sweeps with aggregated errors
 * - TOML settings and tracing-based logging
 *
 * The transport-independent logic lives in `fleetpool-core`, re-exported
 * here as `fleetpool::pool`.
 */

pub mod config;
pub mod error;
pub mod logging;
pub mod tcp;

pub use fleetpool_core as pool;

// Re-export commonly used types
pub use config::{LogLevel, LoggingSettings, PoolSettings};
pub use error::{FleetError, Result};
pub use fleetpool_core::{ConnPool, ConnState, PoolConfig, PoolError, PooledConn};
pub use tcp::TcpDialer;

use tracing::info;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Validate `settings` and build a TCP pool with every configured server
/// registered
pub fn build_tcp_pool(settings: &PoolSettings) -> Result<ConnPool<TcpDialer>> {
    settings.validate()?;

    let dialer = TcpDialer::new().with_nodelay(settings.tcp_nodelay);
    let mut pool = ConnPool::new(settings.to_pool_config(), dialer);
    for address in &settings.servers {
        pool.register_server(address.as_str());
    }

    info!(servers = pool.len(), "connection pool ready");
    Ok(pool)
}
