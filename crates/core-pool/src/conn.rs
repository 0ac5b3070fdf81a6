//! Connection handles dispensed by the pool
//!
//! A [`PooledConn`] wraps one raw connection and remembers the server it came
//! from. Exactly one of [`PooledConn::return_to_pool`] or [`PooledConn::close`]
//! must be called per handle: returning keeps the connection open for reuse,
//! closing gives its slot back to the server. A handle dropped without either
//! keeps its slot occupied for the lifetime of the pool.
//!
//! The handle is a byte stream itself when the raw connection is one:
//!
//! ```no_run
//! use fleetpool_core::{ConnPool, Dialer, PoolError};
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example<D>(pool: &ConnPool<D>) -> Result<(), PoolError>
//! # where D: Dialer, D::Conn: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin {
//! let mut conn = pool.open_conn(&CancellationToken::new()).await?;
//!
//! let mut reply = [0u8; 5];
//! let sent = conn.write_all(b"hello").await;
//! let received = conn.read_exact(&mut reply).await;
//!
//! if sent.is_err() || received.is_err() {
//!     conn.mark_broken();
//! }
//! conn.return_to_pool().await?;
//! # Ok(())
//! # }
//! ```

use crate::dialer::{Dialer, Transport};
use crate::error::{PoolError, Result};
use crate::server::Server;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};
use tracing::warn;

/// Lifecycle of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Dispensed and usable
    Active,
    /// Raw connection went back to the idle queue
    Returned,
    /// Raw connection was closed and its slot released
    Closed,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnState::Active => write!(f, "active"),
            ConnState::Returned => write!(f, "returned to pool"),
            ConnState::Closed => write!(f, "closed"),
        }
    }
}

/// A connection checked out of the pool
pub struct PooledConn<D: Dialer> {
    raw: Option<D::Conn>,
    server: Arc<Server<D>>,
    state: ConnState,
    broken: bool,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl<D: Dialer> PooledConn<D> {
    pub(crate) fn new(raw: D::Conn, server: Arc<Server<D>>) -> Self {
        Self {
            raw: Some(raw),
            server,
            state: ConnState::Active,
            broken: false,
            deadline: None,
        }
    }

    /// Address of the server this connection belongs to
    pub fn address(&self) -> &str {
        self.server.address()
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Mark the connection unusable: releasing it will close it for real
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// The raw connection as produced by the dialer, while the handle is active
    ///
    /// Only the handle's own release methods do pool bookkeeping; closing the
    /// raw connection directly does not free its slot.
    pub fn original_conn(&self) -> Option<&D::Conn> {
        self.raw.as_ref()
    }

    pub fn original_conn_mut(&mut self) -> Option<&mut D::Conn> {
        self.raw.as_mut()
    }

    /// Fail reads and writes with `TimedOut` once `deadline` has passed.
    ///
    /// `None` clears the deadline. Must be called from within a tokio runtime.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline.map(|at| Box::pin(tokio::time::sleep_until(at)));
    }

    /// Put the connection back into its server's idle queue.
    ///
    /// A connection marked broken is closed instead.
    pub async fn return_to_pool(&mut self) -> Result<()> {
        if self.broken {
            return self.close().await;
        }

        let raw = self.take_active(ConnState::Returned)?;
        self.server.push_idle(raw).await;
        Ok(())
    }

    /// Close the raw connection and release its slot
    ///
    /// The slot is released even if closing the transport fails.
    pub async fn close(&mut self) -> Result<()> {
        let mut raw = self.take_active(ConnState::Closed)?;
        self.server.release_slot().await;

        raw.close().await.map_err(|source| PoolError::Close {
            address: self.server.address().to_string(),
            source,
        })
    }

    fn take_active(&mut self, next: ConnState) -> Result<D::Conn> {
        if self.state != ConnState::Active {
            return Err(PoolError::AlreadyReleased(self.state));
        }
        let raw = self
            .raw
            .take()
            .ok_or(PoolError::AlreadyReleased(self.state))?;

        self.state = next;
        self.deadline = None;
        Ok(raw)
    }

    fn poll_deadline(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if let Some(deadline) = self.deadline.as_mut() {
            if deadline.as_mut().poll(cx).is_ready() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "connection deadline exceeded",
                ));
            }
        }
        Ok(())
    }

    fn raw_mut(&mut self) -> io::Result<&mut D::Conn> {
        let state = self.state;
        self.raw.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, format!("connection already {state}"))
        })
    }
}

impl<D: Dialer> fmt::Debug for PooledConn<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConn")
            .field("address", &self.server.address())
            .field("state", &self.state)
            .field("broken", &self.broken)
            .finish_non_exhaustive()
    }
}

impl<D: Dialer> Drop for PooledConn<D> {
    fn drop(&mut self) {
        if self.state == ConnState::Active {
            warn!(
                address = %self.server.address(),
                "pooled connection dropped without being returned or closed; its slot stays taken"
            );
        }
    }
}

impl<D> AsyncRead for PooledConn<D>
where
    D: Dialer,
    D::Conn: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.poll_deadline(cx)?;
        Pin::new(this.raw_mut()?).poll_read(cx, buf)
    }
}

impl<D> AsyncWrite for PooledConn<D>
where
    D: Dialer,
    D::Conn: AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.poll_deadline(cx)?;
        Pin::new(this.raw_mut()?).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.poll_deadline(cx)?;
        Pin::new(this.raw_mut()?).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(this.raw_mut()?).poll_shutdown(cx)
    }
}
