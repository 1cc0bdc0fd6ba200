//! Shared primitive types for the metal control plane.
//!
//! Every resource in the system is addressed by a typed, prefixed identifier
//! (`team_…`, `app_…`, `server_…`). The prefix makes ids self-describing on
//! the wire and lets API boundaries reject an id of the wrong kind before any
//! storage lookup happens.

mod id;

pub use id::{
    ApiTokenId, AppEnvVarsId, AppId, AppSettingsId, BuildId, CellId, EnvId, IdError, InviteId,
    OfferingId, PaymentMethodId, ServerId, TeamId, TypedId, UserId,
};
