//! Typed prefixed identifiers.
//!
//! Ids are formatted as `{prefix}_{ulid}` with a lowercase ULID suffix. They
//! are globally unique and opaque outside the system; the only structure a
//! caller may rely on is the prefix.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a string fails typed-id validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}")]
pub struct IdError {
    /// The id kind that was expected, e.g. `app_id`.
    pub kind: &'static str,
}

impl IdError {
    fn new(kind: &'static str) -> Self {
        Self { kind }
    }
}

/// Common behaviour of every typed id.
pub trait TypedId: Sized + fmt::Display + FromStr<Err = IdError> {
    /// The required prefix, without the trailing underscore.
    const PREFIX: &'static str;

    /// The field name used in validation errors, e.g. `app_id`.
    const KIND: &'static str;

    /// Generate a fresh id with a lowercase ULID suffix.
    fn generate() -> Self;

    /// View the full id string, prefix included.
    fn as_str(&self) -> &str;
}

macro_rules! typed_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal, $kind:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an id string without validating it. Used when the value
            /// comes from a trusted source such as a store row.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Parse an id string, validating the prefix.
            pub fn parse(s: &str) -> Result<Self, IdError> {
                s.parse()
            }
        }

        impl TypedId for $name {
            const PREFIX: &'static str = $prefix;
            const KIND: &'static str = $kind;

            fn generate() -> Self {
                Self(format!(
                    "{}_{}",
                    $prefix,
                    ulid::Ulid::new().to_string().to_lowercase()
                ))
            }

            fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let rest = s
                    .strip_prefix(concat!($prefix, "_"))
                    .ok_or_else(|| IdError::new($kind))?;
                if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(IdError::new($kind));
                }
                Ok(Self(s.to_owned()))
            }
        }
    };
}

typed_id!(
    /// Identifier of a user account.
    UserId, "user", "user_id"
);
typed_id!(
    /// Identifier of a team, the owner of all other resources.
    TeamId, "team", "team_id"
);
typed_id!(
    /// Identifier of an application workload.
    AppId, "app", "app_id"
);
typed_id!(
    /// Identifier of a named environment within a team.
    EnvId, "env", "env_id"
);
typed_id!(
    /// Identifier of a purchased bare-metal server.
    ServerId, "server", "server_id"
);
typed_id!(
    /// Identifier of a cell, a managed cluster of servers.
    CellId, "cell", "cell_id"
);
typed_id!(
    /// Identifier of a build record.
    BuildId, "build", "build_id"
);
typed_id!(
    /// Identifier of an API token record (not the secret itself).
    ApiTokenId, "apitoken", "apitoken_id"
);
typed_id!(
    /// Identifier of a stored payment method.
    PaymentMethodId, "pm", "pm_id"
);
typed_id!(
    /// Identifier of an immutable app-settings snapshot.
    AppSettingsId, "appsettings", "appsettings_id"
);
typed_id!(
    /// Identifier of an immutable env-vars snapshot.
    AppEnvVarsId, "appenvvars", "appenvvars_id"
);
typed_id!(
    /// Identifier of a hardware offering in the static catalog.
    OfferingId, "offering", "offering_id"
);
typed_id!(
    /// Identifier of an outstanding team invite.
    InviteId, "invite", "invite_id"
);
