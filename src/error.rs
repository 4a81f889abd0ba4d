//! Error types for the oa-agent-bridge crate.

use std::path::PathBuf;

/// Bridge-specific error types.
///
/// Everything here is recovered into a structured payload at the dispatch
/// layer; none of these variants terminate the server.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Adapter name not present in the registry.
    #[error("Unknown adapter: {name} (valid: {})", valid.join(", "))]
    UnknownAdapter { name: String, valid: Vec<String> },

    /// A value interpolated into argv looks like a CLI flag.
    #[error("{field} cannot start with '-': {value}")]
    FlagInjection { field: &'static str, value: String },

    /// Caller input violates a precondition.
    #[error("{0}")]
    Validation(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error with context.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Sandbox setup or diff failure.
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// Adapter CLI returned something unusable (model listing).
    #[error("{command} failed: {reason}")]
    Subprocess { command: String, reason: String },
}

impl BridgeError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from caller input rather than infrastructure.
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnknownAdapter { .. } | Self::FlagInjection { .. } | Self::Validation(_)
        )
    }
}

/// Convenience result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
