//! WebSocket error taxonomy.

use thiserror::Error;

/// Errors raised by the codec, the handshake, and [`Connection`](crate::Connection).
#[derive(Debug, Error)]
pub enum WsError {
    /// The stream ended before a complete frame (or handshake head) arrived.
    #[error("stream ended mid-frame")]
    IncompleteRead,
    /// The peer sent a malformed frame or a frame the role forbids.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// The upgrade exchange failed (bad status line, missing headers, ...).
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),
    /// The connection is closed (or closing) and cannot carry messages.
    #[error("connection closed")]
    ConnectionClosed,
    /// A bounded wait elapsed (handshake, or a write the peer never drained).
    #[error("timed out: {0}")]
    Timeout(&'static str),
    /// Transport-level failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl WsError {
    /// Whether the error ends the connection it occurred on.
    ///
    /// Every variant does except `HandshakeRejected`, which happens before a
    /// connection exists.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::HandshakeRejected(_))
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::IncompleteRead => "incomplete_read",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::HandshakeRejected(_) => "handshake_rejected",
            Self::ConnectionClosed => "connection_closed",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io",
        }
    }
}

/// Result type for WebSocket operations.
pub type Result<T> = std::result::Result<T, WsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_rejection_is_not_fatal() {
        assert!(!WsError::HandshakeRejected("no 101".into()).is_fatal());
        assert!(WsError::IncompleteRead.is_fatal());
        assert!(WsError::ConnectionClosed.is_fatal());
        assert!(WsError::ProtocolViolation("rsv".into()).is_fatal());
        assert!(WsError::Timeout("write").is_fatal());
    }

    #[test]
    fn io_error_from_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: WsError = io.into();
        assert!(matches!(err, WsError::Io(_)));
        assert_eq!(err.error_kind(), "io");
    }

    #[test]
    fn display_messages() {
        assert_eq!(WsError::ConnectionClosed.to_string(), "connection closed");
        assert_eq!(
            WsError::ProtocolViolation("reserved bits set".into()).to_string(),
            "protocol violation: reserved bits set"
        );
    }
}
