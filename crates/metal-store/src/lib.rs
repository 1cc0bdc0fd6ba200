//! Durable record of users, teams, servers, cells, apps, and deployments.
//!
//! This crate provides the repository traits and two implementations: an
//! in-memory backend for testing and a PostgreSQL backend for production.
//! It is the authoritative state for every workflow in the control plane.

mod error;
mod memory;
pub mod password;
mod postgres;
pub mod secrets;
pub mod test_fixtures;
mod traits;
mod types;

pub use error::{Entity, StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::{
    ApiTokenStore, AppStore, BuildStore, CellStore, DeploymentStore, ServerStore, SnapshotStore,
    Store, TeamStore, UserStore,
};
pub use types::{
    AgeKeypair, ApiToken, App, AppEnvVars, AppSettings, Build, BuildStatus, Cell, CellType,
    Deployment, DeploymentStatus, Env, HourlyBillingState, ImageArtifact, PaymentMethod,
    PortSpec, ResourceSpec, Server, ServerStatus, TalosCellData, Team, TeamInvite, TeamMember,
    TeamRole, User,
};
