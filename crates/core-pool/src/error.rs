//! Error types for the connection pool

use crate::conn::ConnState;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PoolError>;

/// Why a server refused an acquisition attempt without dialing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    /// The previous attempt was less than one request interval ago
    TooFrequent,
    /// Every connection slot of the server is taken
    TooManyOpenConnections,
}

impl fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitReason::TooFrequent => write!(f, "too frequent request"),
            RateLimitReason::TooManyOpenConnections => write!(f, "too many open connections"),
        }
    }
}

/// Failure of a single dial attempt
#[derive(Debug, Error)]
pub enum DialError {
    /// The connect timeout elapsed or the caller cancelled first
    #[error("can't dial to {address}: timeout after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    /// The dialer reported an error
    #[error("can't dial to {address}: {source}")]
    Io {
        address: String,
        #[source]
        source: io::Error,
    },

    /// The dial task died without producing a result
    #[error("dial task for {address} was aborted")]
    Aborted { address: String },
}

/// Why a server is considered down
#[derive(Debug, Error)]
pub enum DownCause {
    /// A previous dial failed and the backoff interval has not elapsed yet
    #[error("retry after {retry_after:?}")]
    Backoff { retry_after: Duration },

    /// The dial attempt made by this acquisition failed
    #[error("can't establish connection: {0}")]
    Dial(#[from] DialError),
}

/// Errors produced by servers, the pool and pooled connections
#[derive(Debug, Error)]
pub enum PoolError {
    /// The server paced or capped this attempt; retrying later may succeed
    #[error("server {address} is ratelimited: {reason}")]
    RateLimited {
        address: String,
        reason: RateLimitReason,
        retry_after: Duration,
    },

    /// The server failed its last dial and is backing off
    #[error("server {address} is down: {cause}")]
    ServerDown {
        address: String,
        #[source]
        cause: DownCause,
    },

    /// The pool has nothing to sweep
    #[error("no servers registered")]
    NoServersRegistered,

    /// Every server of the sweep was down
    #[error("all servers are down")]
    AllServersDown { retry_after: Duration },

    /// Every server of the sweep was ratelimited
    #[error("all servers are ratelimited")]
    AllServersRateLimited { retry_after: Duration },

    /// The sweep saw both down and ratelimited servers
    #[error("some servers are down, other ratelimited")]
    PartiallyDown { retry_after: Duration },

    /// The caller cancelled the acquisition
    #[error("operation cancelled")]
    Cancelled,

    /// Release was called on a handle that was already released
    #[error("connection already {0}")]
    AlreadyReleased(ConnState),

    /// Closing the raw connection failed; the slot was released anyway
    #[error("can't close connection to {address}: {source}")]
    Close {
        address: String,
        #[source]
        source: io::Error,
    },
}

impl PoolError {
    /// Check if this error is transient and a later attempt may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PoolError::RateLimited { .. }
                | PoolError::ServerDown { .. }
                | PoolError::AllServersDown { .. }
                | PoolError::AllServersRateLimited { .. }
                | PoolError::PartiallyDown { .. }
        )
    }

    /// Suggested wait before the next attempt, if the error carries one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            PoolError::RateLimited { retry_after, .. }
            | PoolError::AllServersDown { retry_after }
            | PoolError::AllServersRateLimited { retry_after }
            | PoolError::PartiallyDown { retry_after } => Some(*retry_after),
            PoolError::ServerDown {
                cause: DownCause::Backoff { retry_after },
                ..
            } => Some(*retry_after),
            _ => None,
        }
    }
}
