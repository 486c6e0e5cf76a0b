//! Error types for the courier.

use thiserror::Error;

/// Courier error type.
#[derive(Error, Debug)]
pub enum CourierError {
    /// Gateway could not be reached, written to, or read from
    #[error("Gateway connection error: {0}")]
    Connection(String),

    /// Protocol error (undecodable or out-of-range error frame)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error (missing credential, bad setting)
    #[error("Configuration error: {0}")]
    Config(String),

    /// No application with the given ID
    #[error("Application not found: {0}")]
    ApplicationNotFound(String),

    /// Storage error
    #[error("Database error: {0}")]
    Database(#[from] push_database::DatabaseError),

    /// IO error (socket operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (payload serialization)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CourierError {
    /// Whether the gateway was unreachable or dropped the connection.
    pub fn is_connection(&self) -> bool {
        matches!(self, CourierError::Connection(_) | CourierError::Io(_))
    }
}

/// Result type for courier operations.
pub type CourierResult<T> = Result<T, CourierError>;
