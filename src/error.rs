//! Error types for the Gatehouse service.

use thiserror::Error;

/// Main error type for Gatehouse operations.
///
/// Capacity exhaustion is not represented here: a refused request is a normal
/// [`Admission::Rejected`](crate::admission::Admission) outcome.
#[derive(Error, Debug)]
pub enum GatehouseError {
    /// Invalid or unreadable configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GatehouseError {
    fn from(e: config::ConfigError) -> Self {
        GatehouseError::Config(e.to_string())
    }
}

/// Result type alias for Gatehouse operations.
pub type Result<T> = std::result::Result<T, GatehouseError>;
