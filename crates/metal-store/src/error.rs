//! Error types for the store.

/// Result type alias using [`StoreError`].
pub type StoreResult<T> = Result<T, StoreError>;

/// The entity kinds a lookup can miss on.
///
/// Not-found errors are per-entity so API boundaries can produce precise 404
/// bodies and handlers can distinguish a missing row from a backend fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Team,
    ApiToken,
    Server,
    Cell,
    App,
    Env,
    AppSettings,
    AppEnvVars,
    Deployment,
    Build,
    PaymentMethod,
    Invite,
}

impl Entity {
    /// Lowercase name used in error messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Team => "team",
            Self::ApiToken => "api token",
            Self::Server => "server",
            Self::Cell => "cell",
            Self::App => "app",
            Self::Env => "env",
            Self::AppSettings => "app settings",
            Self::AppEnvVars => "app env vars",
            Self::Deployment => "deployment",
            Self::Build => "build",
            Self::PaymentMethod => "payment method",
            Self::Invite => "invite",
        }
    }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur in store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested row does not exist (or belongs to another team).
    #[error("{0} not found")]
    NotFound(Entity),

    /// A create collided with an existing row. Callers retrying a create
    /// with the same id should treat this as success.
    #[error("{entity} already exists: {key}")]
    Conflict {
        /// The entity kind that collided.
        entity: Entity,
        /// The conflicting key, for logs.
        key: String,
    },

    /// The backing database failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Password hashing or verification failed.
    #[error("password error: {0}")]
    Password(String),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Create a conflict error.
    #[must_use]
    pub fn conflict(entity: Entity, key: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            key: key.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether this error is a not-found for the given entity.
    #[must_use]
    pub fn is_not_found(&self, entity: Entity) -> bool {
        matches!(self, Self::NotFound(e) if *e == entity)
    }

    /// Whether this error is a duplicate-key conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
