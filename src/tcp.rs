/*!
 * Default TCP dialer
 */

use fleetpool_core::Dialer;
use std::io;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Dials plain TCP connections to `host:port` addresses
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer {
    nodelay: bool,
}

impl TcpDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `TCP_NODELAY` on every dialed connection
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn nodelay(&self) -> bool {
        self.nodelay
    }
}

#[async_trait::async_trait]
impl Dialer for TcpDialer {
    type Conn = TcpStream;

    async fn dial(&self, address: &str, cancel: CancellationToken) -> io::Result<TcpStream> {
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "dial cancelled"));
            }
            result = TcpStream::connect(address) => result?,
        };

        if self.nodelay {
            stream.set_nodelay(true)?;
        }

        trace!(%address, local = ?stream.local_addr().ok(), "dialed");
        Ok(stream)
    }
}
