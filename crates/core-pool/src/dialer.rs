//! Seams between the pool and the transport layer

use std::io;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// A raw connection produced by a [`Dialer`]
#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Close the underlying transport
    async fn close(&mut self) -> io::Result<()>;
}

#[async_trait::async_trait]
impl Transport for TcpStream {
    async fn close(&mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

#[async_trait::async_trait]
impl Transport for DuplexStream {
    async fn close(&mut self) -> io::Result<()> {
        self.shutdown().await
    }
}

/// Opens raw connections to registered addresses
///
/// Implementations must be safe to call concurrently for different addresses.
/// The pool bounds every dial with its connect timeout and abandons it on
/// cancellation without waiting for the dialer; `cancel` is fired when that
/// happens so well-behaved dialers can stop early.
///
/// # Example
/// ```no_run
/// use fleetpool_core::Dialer;
/// use tokio::net::TcpStream;
/// use tokio_util::sync::CancellationToken;
///
/// struct PlainTcp;
///
/// #[async_trait::async_trait]
/// impl Dialer for PlainTcp {
///     type Conn = TcpStream;
///
///     async fn dial(&self, address: &str, _cancel: CancellationToken) -> std::io::Result<TcpStream> {
///         TcpStream::connect(address).await
///     }
/// }
/// ```
#[async_trait::async_trait]
pub trait Dialer: Send + Sync + 'static {
    type Conn: Transport;

    /// Dial `address`, the same string given to `register_server`
    async fn dial(&self, address: &str, cancel: CancellationToken) -> io::Result<Self::Conn>;
}
