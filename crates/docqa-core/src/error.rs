//! Error types for the docqa pipeline.

use thiserror::Error;

/// Result type alias using RagError.
pub type Result<T> = std::result::Result<T, RagError>;

/// Errors that can occur in the docqa pipeline.
///
/// Collaborator failures (`Store`, `Generation`, `Timeout`,
/// `MalformedExpansion`) are recovered inside the retrieval engine and only
/// show up in logs. `Config` is fatal at startup.
#[derive(Error, Debug)]
pub enum RagError {
    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Similarity store error.
    #[error("Store error: {message}")]
    Store { message: String },

    /// Generation collaborator error.
    #[error("Generation error: {message}")]
    Generation { message: String },

    /// Embedding model error.
    #[error("Embedding error: {message}")]
    Embedding { message: String },

    /// A collaborator call exceeded its deadline.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Generation output could not be parsed into an expansion.
    #[error("Malformed expansion: {reason}")]
    MalformedExpansion { reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl RagError {
    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create a generation error.
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create a malformed expansion error.
    pub fn malformed_expansion(reason: impl Into<String>) -> Self {
        Self::MalformedExpansion {
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get a stable error code, used in logs and CLI output.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Store { .. } => "STORE_ERROR",
            Self::Generation { .. } => "GENERATION_ERROR",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::MalformedExpansion { .. } => "MALFORMED_EXPANSION",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }

    /// Whether the pipeline recovers from this error locally by degrading.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Store { .. }
                | Self::Generation { .. }
                | Self::Embedding { .. }
                | Self::Timeout { .. }
                | Self::MalformedExpansion { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RagError::timeout("similarity search", 5000);
        assert_eq!(err.to_string(), "similarity search timed out after 5000ms");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(RagError::config("bad").error_code(), "CONFIG_ERROR");
        assert_eq!(
            RagError::malformed_expansion("no json").error_code(),
            "MALFORMED_EXPANSION"
        );
        assert_eq!(RagError::store("down").error_code(), "STORE_ERROR");
    }

    #[test]
    fn test_recoverable() {
        assert!(RagError::generation("503").is_recoverable());
        assert!(RagError::timeout("generate", 10).is_recoverable());
        assert!(!RagError::config("top_k must be >= 1").is_recoverable());
        assert!(!RagError::invalid_argument("x").is_recoverable());
    }
}
