//! Core error types.

use thiserror::Error;

/// Errors raised while building or decoding detection data.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A wire message matched neither the structured nor the legacy shape.
    #[error("undecodable message: {0}")]
    DecodeFailure(String),
    /// A configured label could not be turned into a matcher.
    #[error("invalid label {label:?}: {source}")]
    InvalidLabel {
        /// The offending label.
        label: String,
        /// Underlying regex error.
        #[source]
        source: regex::Error,
    },
    /// A structured record could not be serialized.
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl CoreError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::DecodeFailure(_) => "decode_failure",
            Self::InvalidLabel { .. } => "invalid_label",
            Self::Encode(_) => "encode",
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
