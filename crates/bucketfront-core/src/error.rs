//! Error types for the bucketfront core.

/// Core error type for configuration and sidecar handling.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A configuration value could not be parsed.
    #[error("invalid value for {key}: {message}")]
    InvalidConfig {
        /// The environment variable or setting name.
        key: String,
        /// Why the value was rejected.
        message: String,
    },

    /// The `X-File-Info` sidecar is not valid JSON for the expected schema.
    #[error("malformed sidecar: {0}")]
    MalformedSidecar(#[from] serde_json::Error),

    /// The sidecar declares a schema version this build does not understand.
    #[error("unsupported sidecar version: {0}")]
    UnsupportedSidecarVersion(u32),
}

impl CoreError {
    /// Build an [`CoreError::InvalidConfig`] for `key`.
    pub fn invalid_config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Convenience result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
