//! Error types for broker operations

use std::fmt;

/// Result type alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors that can occur talking to the stream broker
#[derive(Debug)]
pub enum BrokerError {
    /// Connecting to the broker failed
    ConnectionFailed(String),

    /// A broker command failed
    CommandFailed(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to stream broker: {}", msg)
            }
            BrokerError::CommandFailed(msg) => write!(f, "broker command failed: {}", msg),
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_io_error() {
            BrokerError::ConnectionFailed(err.to_string())
        } else {
            BrokerError::CommandFailed(err.to_string())
        }
    }
}
