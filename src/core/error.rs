use std::io;
use thiserror::Error;

/// Error types for the RAMSES-II stack
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A command failed its grammar checks and never reached the queue
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A received line could not be decoded or failed its schema
    #[error("Decode error: {0}")]
    Decode(String),

    /// A correlated request reached its deadline without a matching response
    #[error("The callback has expired: {0}")]
    ExpiredCallback(String),

    #[error("Dispatch queue is full ({0} entries)")]
    QueueCapacityExceeded(usize),

    #[error("Transport is closing or has closed: {0}")]
    TransportClosed(String),

    #[error("Exceeded maximum number of subscribers ({0})")]
    TooManySubscribers(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new invalid command error
    pub fn invalid_command(msg: impl Into<String>) -> Self {
        Error::InvalidCommand(msg.into())
    }

    /// Creates a new decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Error::Decode(msg.into())
    }

    /// Creates a new expired callback error
    pub fn expired_callback(msg: impl Into<String>) -> Self {
        Error::ExpiredCallback(msg.into())
    }

    /// Creates a new transport closed error
    pub fn transport_closed(msg: impl Into<String>) -> Self {
        Error::TransportClosed(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new schedule error
    pub fn schedule(msg: impl Into<String>) -> Self {
        Error::Schedule(msg.into())
    }

    /// Whether the error is a correlation timeout, which callers may log and ride out
    pub fn is_expired(&self) -> bool {
        matches!(self, Error::ExpiredCallback(_))
    }
}
