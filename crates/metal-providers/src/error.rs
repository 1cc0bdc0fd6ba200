//! Error types for provider adapters.

/// Result type alias using [`ProviderError`].
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur talking to an external provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The provider has no record of the requested object.
    #[error("not found at provider: {0}")]
    NotFound(String),

    /// A request was rejected before it was sent.
    #[error("validation error: {0}")]
    Validation(String),

    /// A transient upstream failure. The caller should retry.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The provider rejected the request permanently.
    #[error("rejected by provider: {0}")]
    Rejected(String),

    /// A meter event with the same idempotency identifier already exists.
    /// Treated as success by the billing path.
    #[error("meter event already exists")]
    MeterEventAlreadyExists,

    /// HTTP transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// Create an upstream error.
    #[must_use]
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
