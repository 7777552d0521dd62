//! Errors raised while building the HTTP services.

/// Why a service could not be constructed.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The metrics registry rejected a metric.
    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The upstream HTTP client could not be built.
    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Convenience alias.
pub type ServiceResult<T> = Result<T, ServiceError>;
