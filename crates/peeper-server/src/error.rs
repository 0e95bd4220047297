//! Server error types.

use std::net::SocketAddr;

use thiserror::Error;

/// Process-fatal server errors. Per-peer failures never surface here.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured address could not be resolved or parsed.
    #[error("invalid listen address {0:?}")]
    InvalidAddress(String),
    /// Binding the listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Reading the bound address back failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
