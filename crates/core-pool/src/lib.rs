//! Fleetpool Core: Pure-logic outbound connection pool
//!
//! # Overview
//!
//! This crate hands out connections to a fleet of interchangeable backend
//! servers while protecting each of them:
//!
//! - **Pacing**: at most `max_rps` acquisition attempts per server per second
//! - **Capacity**: at most `max_conns_per_server` open connections per server
//! - **Reuse**: returned connections wait in a per-server FIFO idle queue
//! - **Backoff**: a server whose dial failed is skipped for an exponentially
//!   growing interval, reset by the next successful dial
//! - **Rotation**: every sweep starts one server further than the last one
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Wire protocols (HTTP, Redis, memcached, ...)
//! - How an address is turned into a connection
//! - Where configuration comes from
//!
//! Transports plug in through [`Dialer`] and [`Transport`], time through
//! [`Clock`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │ open_conn / open_conn_non_block
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       ConnPool                          │  ← Round-robin sweeps
//! │  (Aggregates failures, waits, retries)  │
//! └─────────────┬───────────────────────────┘
//!               │ acquire, one lock per server
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Server                            │  ← Pacing, capacity, backoff
//! │  (Idle FIFO, open count, down state)    │
//! └─────────────┬───────────────────────────┘
//!               │ dial (timeout, cancellable)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Dialer                            │  ← Your transport
//! └─────────────────────────────────────────┘
//!
//!  Handed back to the caller:
//!   PooledConn → return_to_pool() | close()
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use fleetpool_core::{ConnPool, Dialer, PoolConfig, PoolError};
//! use std::time::Duration;
//! use tokio::net::TcpStream;
//! use tokio_util::sync::CancellationToken;
//!
//! struct PlainTcp;
//!
//! #[async_trait::async_trait]
//! impl Dialer for PlainTcp {
//!     type Conn = TcpStream;
//!
//!     async fn dial(&self, address: &str, _cancel: CancellationToken) -> std::io::Result<TcpStream> {
//!         TcpStream::connect(address).await
//!     }
//! }
//!
//! # async fn example() -> Result<(), PoolError> {
//! let config = PoolConfig {
//!     max_conns_per_server: 4,
//!     max_rps: 50,
//!     connect_timeout: Duration::from_secs(2),
//!     ..Default::default()
//! };
//!
//! let mut pool = ConnPool::new(config, PlainTcp);
//! pool.register_server("10.0.0.1:11211");
//! pool.register_server("10.0.0.2:11211");
//!
//! let cancel = CancellationToken::new();
//! let mut conn = pool.open_conn_within(&cancel, Duration::from_secs(10)).await?;
//! // Use connection...
//!
//! conn.return_to_pool().await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod clock;
pub mod config;
pub mod conn;
pub mod containers;
pub mod dialer;
pub mod error;
pub mod pool;
pub mod server;

// Re-export main types for convenience
pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PoolConfig;
pub use conn::{ConnState, PooledConn};
pub use dialer::{Dialer, Transport};
pub use error::{DialError, DownCause, PoolError, RateLimitReason, Result};
pub use pool::ConnPool;
pub use server::{Server, ServerStats};

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use fleetpool_core::prelude::*;
/// ```
pub mod prelude {
    pub use super::clock::{Clock, ManualClock, SystemClock};
    pub use super::config::PoolConfig;
    pub use super::conn::{ConnState, PooledConn};
    pub use super::dialer::{Dialer, Transport};
    pub use super::error::PoolError;
    pub use super::pool::ConnPool;
    pub use super::server::ServerStats;
}
