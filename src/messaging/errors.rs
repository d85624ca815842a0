//! # Messaging Error Types
//!
//! Structured errors for the broker transport using thiserror instead of
//! `Box<dyn Error>` patterns.

use thiserror::Error;

/// Transport-level failures surfaced synchronously to the caller of
/// `connect`, `subscribe`, `publish`, `unsubscribe` or `disconnect`
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Connection to {address} failed: {message}")]
    Connection { address: String, message: String },

    #[error("Broker rejected {operation}: {message}")]
    BrokerRejected { operation: String, message: String },

    #[error("Not connected: cannot {operation}")]
    NotConnected { operation: String },

    #[error("Publish to {destination} failed: {message}")]
    Publish { destination: String, message: String },

    #[error("Subscribe to {destination} failed: {message}")]
    Subscribe { destination: String, message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Frame too large: {size_bytes} bytes exceeds limit of {limit_bytes} bytes")]
    FrameTooLarge {
        size_bytes: usize,
        limit_bytes: usize,
    },

    #[error("Network timeout: operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("I/O error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

impl MessagingError {
    /// Create a connection error
    pub fn connection(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create a broker rejection error (an `ERROR` frame answered our request)
    pub fn broker_rejected(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BrokerRejected {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a not-connected error
    pub fn not_connected(operation: impl Into<String>) -> Self {
        Self::NotConnected {
            operation: operation.into(),
        }
    }

    /// Create a publish error
    pub fn publish(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create a subscribe error
    pub fn subscribe(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subscribe {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Wrap an I/O error with the operation that produced it
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Whether the error means the connection itself is gone
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            Self::NotConnected { .. } | Self::Connection { .. } | Self::Io { .. }
        )
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messaging_error_creation() {
        let conn_err = MessagingError::connection("localhost:61616", "refused");
        assert!(matches!(conn_err, MessagingError::Connection { .. }));
        assert!(conn_err.is_connection_loss());

        let publish_err = MessagingError::publish("out_queue", "broken pipe");
        assert!(matches!(publish_err, MessagingError::Publish { .. }));
        assert!(!publish_err.is_connection_loss());

        let timeout_err = MessagingError::timeout("connect", 10_000);
        assert!(matches!(timeout_err, MessagingError::Timeout { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = MessagingError::connection("localhost:61616", "Connection refused");
        let display_str = format!("{err}");
        assert!(display_str.contains("localhost:61616"));
        assert!(display_str.contains("Connection refused"));

        let err = MessagingError::FrameTooLarge {
            size_bytes: 2048,
            limit_bytes: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Frame too large: 2048 bytes exceeds limit of 1024 bytes"
        );
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error as _;
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = MessagingError::io("send frame", io);
        assert!(err.source().is_some());
        assert!(err.to_string().contains("send frame"));
    }
}
