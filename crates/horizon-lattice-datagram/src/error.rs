//! Error types for the datagram server.

use std::io;
use std::net::SocketAddr;

/// Boxed error returned by user-supplied request handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the datagram server.
///
/// Construction and start errors are returned synchronously. Everything that
/// happens while the server is running (handler failures, write failures,
/// read failures) is reported through the server's `error` signal instead.
#[derive(Debug, thiserror::Error)]
pub enum DatagramError {
    /// The configuration failed validation.
    #[error("invalid configuration for '{field}': {reason}")]
    InvalidConfig {
        /// The offending configuration field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The binder could not produce a socket.
    #[error("failed to bind '{address}': {source}")]
    Bind {
        /// The configured bind address.
        address: String,
        #[source]
        source: io::Error,
    },

    /// `start` was called on a running or stopped server.
    #[error("server has already been started")]
    AlreadyStarted,

    /// `stop` was called on a server that is not running.
    #[error("server is not running")]
    NotRunning,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    /// The request handler rejected a datagram.
    #[error("request handler failed for datagram from {source_addr}: {message}")]
    Handler {
        /// The peer that sent the datagram.
        source_addr: SocketAddr,
        /// The handler's error message.
        message: String,
    },

    /// The request handler panicked while handling a datagram.
    #[error("request handler panicked for datagram from {source_addr}: {message}")]
    HandlerPanicked {
        /// The peer that sent the datagram.
        source_addr: SocketAddr,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// Writing a response failed.
    #[error("failed to write response to {destination}: {source}")]
    Write {
        /// Where the response was headed.
        destination: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Writing a response timed out.
    #[error("timed out writing response to {destination}")]
    WriteTimeout {
        /// Where the response was headed.
        destination: SocketAddr,
    },

    /// A socket read failed. The reader keeps going.
    #[error("failed to read datagram: {0}")]
    Read(#[source] io::Error),

    /// The reader gave up after too many consecutive read failures.
    #[error("reader stopped after {errors} consecutive read errors")]
    ReaderFailed {
        /// Number of consecutive failures observed.
        errors: usize,
    },
}

impl DatagramError {
    /// Create a configuration error.
    pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    /// Classify a response write failure.
    ///
    /// `TimedOut` and `WouldBlock` are what a socket with a write timeout
    /// reports when the deadline passes, so both map to [`Self::WriteTimeout`].
    pub fn from_write(destination: SocketAddr, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
                Self::WriteTimeout { destination }
            }
            _ => Self::Write {
                destination,
                source,
            },
        }
    }

    /// Whether this error is a response write timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WriteTimeout { .. })
    }
}

/// A specialized Result type for datagram server operations.
pub type Result<T> = std::result::Result<T, DatagramError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    #[test]
    fn test_write_classification() {
        let timeout = DatagramError::from_write(peer(), io::ErrorKind::TimedOut.into());
        assert!(timeout.is_timeout());

        let would_block = DatagramError::from_write(peer(), io::ErrorKind::WouldBlock.into());
        assert!(would_block.is_timeout());

        let refused =
            DatagramError::from_write(peer(), io::ErrorKind::ConnectionRefused.into());
        assert!(!refused.is_timeout());
        assert!(matches!(refused, DatagramError::Write { .. }));
    }

    #[test]
    fn test_display() {
        let err = DatagramError::invalid_config("network", "unknown family 'tcp'");
        assert_eq!(
            err.to_string(),
            "invalid configuration for 'network': unknown family 'tcp'"
        );
        assert_eq!(
            DatagramError::NotRunning.to_string(),
            "server is not running"
        );
        assert_eq!(
            DatagramError::WriteTimeout {
                destination: peer()
            }
            .to_string(),
            "timed out writing response to 127.0.0.1:4000"
        );
    }
}
