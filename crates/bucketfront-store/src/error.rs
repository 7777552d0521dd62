//! Store error types.

/// Errors raised by object stores, signers and the signed URL cache.
///
/// The type is [`Clone`] so that one signing failure can be handed to every
/// caller waiting on the same in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("object not found: {key}")]
    NotFound {
        /// The key that was looked up.
        key: String,
    },

    /// The key can never name an object (`..` segments, empty segments).
    #[error("invalid object key: {key}")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },

    /// Reading from the backend failed.
    #[error("I/O error on {key}: {message}")]
    Io {
        /// The key being read.
        key: String,
        /// The underlying error message.
        message: String,
    },

    /// The backend call did not finish in time.
    #[error("{operation} on {key} timed out after {timeout_ms}ms")]
    Timeout {
        /// Which call timed out.
        operation: &'static str,
        /// The key involved.
        key: String,
        /// The configured limit.
        timeout_ms: u64,
    },

    /// The signing endpoint is not an absolute URL.
    #[error("invalid storage endpoint {endpoint:?}: {message}")]
    InvalidEndpoint {
        /// The configured endpoint.
        endpoint: String,
        /// What is wrong with it.
        message: String,
    },

    /// A signed URL could not be produced.
    #[error("failed to sign URL for {key}: {message}")]
    Signing {
        /// The key being signed.
        key: String,
        /// Why signing failed.
        message: String,
    },
}

impl StoreError {
    /// Build an [`StoreError::Io`] from an I/O error.
    #[must_use]
    pub fn io(key: &str, err: &std::io::Error) -> Self {
        Self::Io {
            key: key.to_owned(),
            message: err.to_string(),
        }
    }

    /// Whether the error means "no such object" rather than a failure.
    ///
    /// Invalid keys count as absent: a request for `../secret` is answered
    /// like any other missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::InvalidKey { .. })
    }
}

/// Convenience alias.
pub type StoreResult<T> = Result<T, StoreError>;
