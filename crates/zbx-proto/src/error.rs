//! Error types for the zbx-proto crate.
//!
//! Errors are split by who is at fault: the caller's configuration, the bytes
//! on the wire, the connection itself, or the API collaborator.

use std::io;
use std::time::Duration;

use crate::api::ApiError;

/// Framing and payload errors. Always fatal to the round-trip they occur in.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Bad magic: expected \"ZBXD\", got {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("Frame too large: {size} bytes (max: {max})")]
    Oversize { size: u64, max: u64 },

    #[error("Bad payload: {0}")]
    BadPayload(String),

    #[error("Bad version: {0}")]
    BadVersion(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl ProtocolError {
    pub fn bad_payload(message: impl Into<String>) -> Self {
        Self::BadPayload(message.into())
    }
}

/// Connection-level failures. Retrying is up to the caller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Unable to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Unified error type for sender, get and version operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Item not supported: {key}{}", .reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default())]
    NotSupported { key: String, reason: Option<String> },
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// True for failures a caller may reasonably retry (timeouts, resets).
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::Transport(TransportError::Io(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config_factory() {
        let err = Error::config("chunk size must be positive");
        assert_eq!(
            err.to_string(),
            "Config error: chunk size must be positive"
        );
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::BadMagic(*b"HTTP");
        assert!(err.to_string().contains("ZBXD"));

        let err = ProtocolError::Truncated {
            expected: 100,
            actual: 42,
        };
        assert_eq!(
            err.to_string(),
            "Truncated frame: expected 100 bytes, got 42"
        );

        let err = ProtocolError::Oversize {
            size: 5_000_000_000,
            max: 1_073_741_824,
        };
        assert!(err.to_string().contains("5000000000"));

        assert_eq!(ProtocolError::Cancelled.to_string(), "Request cancelled");
    }

    #[test]
    fn test_error_from_protocol_error() {
        let err: Error = ProtocolError::bad_payload("missing info").into();
        assert!(matches!(err, Error::Protocol(ProtocolError::BadPayload(_))));
        assert!(err.to_string().contains("missing info"));
    }

    #[test]
    fn test_error_from_io_error_is_transport() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let err: Error = io_err.into();
        assert!(err.is_transport());
        assert!(err.to_string().contains("reset by peer"));
    }

    #[test]
    fn test_transport_error_connect_display() {
        let err = TransportError::Connect {
            addr: "127.0.0.1:10051".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        let msg = err.to_string();
        assert!(msg.contains("127.0.0.1:10051"));
        assert!(msg.contains("refused"));
    }

    #[test]
    fn test_not_supported_display() {
        let err = Error::NotSupported {
            key: "vfs.fs.size".to_string(),
            reason: Some("Unsupported item key.".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Item not supported: vfs.fs.size (Unsupported item key.)"
        );

        let err = Error::NotSupported {
            key: "agent.ping".to_string(),
            reason: None,
        };
        assert_eq!(err.to_string(), "Item not supported: agent.ping");
        assert!(!err.is_transport());
    }


    #[test]
    fn test_error_debug_format() {
        let err = Error::Protocol(ProtocolError::Cancelled);
        let debug_str = format!("{err:?}");
        assert!(debug_str.contains("Cancelled"));
    }
}
