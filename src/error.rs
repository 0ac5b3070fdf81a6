/*!
 * Error types for Fleetpool
 */

use fleetpool_core::PoolError;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FleetError>;

#[derive(Debug, Error)]
pub enum FleetError {
    /// Invalid or inconsistent settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Settings file is not valid TOML for [`crate::config::PoolSettings`]
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// Error raised by the pool itself
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl FleetError {
    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        match self {
            FleetError::Config(_) | FleetError::Parse(_) => true,
            FleetError::Io(_) => false,
            FleetError::Pool(err) => !err.is_transient(),
        }
    }
}
