//! Error types for cell provisioning.

use metal_providers::ProviderError;
use metal_store::StoreError;

/// Result type alias using [`CellError`].
pub type CellResult<T> = Result<T, CellError>;

/// Errors that can occur while provisioning or operating a cell.
#[derive(Debug, thiserror::Error)]
pub enum CellError {
    /// A provider adapter failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cluster config generation or rendering failed.
    #[error("config generation error: {0}")]
    Config(String),

    /// Secrets encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Archiving the config working tree failed.
    #[error("archive error: {0}")]
    Archive(String),

    /// An in-cluster operation failed.
    #[error("cluster error: {0}")]
    Cluster(String),

    /// A readiness wait ran out of time.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// Filesystem failure in the scratch directory.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CellError {
    /// Create a config error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a crypto error.
    #[must_use]
    pub fn crypto(msg: impl Into<String>) -> Self {
        Self::Crypto(msg.into())
    }

    /// Create a cluster error.
    #[must_use]
    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::Cluster(msg.into())
    }
}
