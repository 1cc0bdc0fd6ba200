//! Repository traits.
//!
//! Each trait covers one aggregate; backends implement all of them and the
//! [`Store`] supertrait lets callers hold a single `Arc<dyn Store>`. Creates
//! are idempotent iff the caller retries with the same id; otherwise they
//! surface [`StoreError::Conflict`]. No repository performs cross-entity
//! transactions; workflows obtain linearizability by re-reading after each
//! step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use metal_core::{
    ApiTokenId, AppEnvVarsId, AppId, AppSettingsId, BuildId, CellId, EnvId, InviteId,
    PaymentMethodId, ServerId, TeamId, UserId,
};

use crate::error::StoreResult;
use crate::types::{
    ApiToken, App, AppEnvVars, AppSettings, Build, BuildStatus, Cell, Deployment,
    DeploymentStatus, Env, HourlyBillingState, ImageArtifact, PaymentMethod, Server,
    ServerStatus, TalosCellData, Team, TeamInvite, TeamRole, User,
};

/// User accounts.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create a user. The password is hashed with Argon2id before storage.
    async fn create_user(&self, email: &str, password: &str) -> StoreResult<User>;

    async fn user_by_email(&self, email: &str) -> StoreResult<User>;

    async fn user_by_id(&self, id: &UserId) -> StoreResult<User>;
}

/// Teams and their owned sub-resources (members, invites, payment methods).
#[async_trait]
pub trait TeamStore: Send + Sync {
    /// Create a team with the creator as its first admin member. A fresh age
    /// keypair is generated for the team's config-at-rest encryption.
    async fn create_team(&self, name: &str, creator: &UserId) -> StoreResult<Team>;

    /// Fetch a team with members, invites, and payment methods preloaded.
    async fn team_by_id(&self, id: &TeamId) -> StoreResult<Team>;

    /// Teams the given user is a member of.
    async fn teams_for_user(&self, user: &UserId) -> StoreResult<Vec<Team>>;

    async fn add_member(&self, team: &TeamId, user: &UserId, role: TeamRole) -> StoreResult<()>;

    async fn remove_member(&self, team: &TeamId, user: &UserId) -> StoreResult<()>;

    async fn create_invite(&self, team: &TeamId, email: &str) -> StoreResult<TeamInvite>;

    async fn delete_invite(&self, team: &TeamId, invite: &InviteId) -> StoreResult<()>;

    /// Outstanding invites addressed to the given email, across all teams.
    async fn invites_for_email(&self, email: &str) -> StoreResult<Vec<(TeamId, TeamInvite)>>;

    /// Record the team's customer id at the payment processor.
    async fn set_billing_account(&self, team: &TeamId, external_id: &str) -> StoreResult<()>;

    /// Add a payment method. The first method on a team is marked default.
    async fn add_payment_method(
        &self,
        team: &TeamId,
        external_id: &str,
    ) -> StoreResult<PaymentMethod>;

    async fn remove_payment_method(&self, team: &TeamId, id: &PaymentMethodId)
        -> StoreResult<()>;
}

/// Bearer credentials for the CLI path.
#[async_trait]
pub trait ApiTokenStore: Send + Sync {
    /// Create a token. The returned record carries the plaintext token; this
    /// is the only time it is handed out.
    async fn create_token(
        &self,
        team: &TeamId,
        creator: &UserId,
        name: &str,
        scope: &str,
    ) -> StoreResult<ApiToken>;

    async fn token_by_token(&self, token: &str) -> StoreResult<ApiToken>;

    async fn tokens_for_team(&self, team: &TeamId) -> StoreResult<Vec<ApiToken>>;

    async fn delete_token(&self, team: &TeamId, id: &ApiTokenId) -> StoreResult<()>;

    async fn touch_token_last_used(&self, id: &ApiTokenId, at: DateTime<Utc>) -> StoreResult<()>;
}

/// Purchased servers.
#[async_trait]
pub trait ServerStore: Send + Sync {
    async fn create_server(&self, server: &Server) -> StoreResult<()>;

    async fn server_by_id(&self, id: &ServerId) -> StoreResult<Server>;

    async fn update_server_status(&self, id: &ServerId, status: ServerStatus) -> StoreResult<()>;

    async fn update_server_public_ipv4(&self, id: &ServerId, ipv4: &str) -> StoreResult<()>;

    /// Record the vendor-side server id. The slug is required alongside the
    /// id so a row can never carry one without the other.
    async fn update_server_provider_id(
        &self,
        id: &ServerId,
        provider_slug: &str,
        provider_id: &str,
    ) -> StoreResult<()>;

    async fn servers_for_team(&self, team: &TeamId) -> StoreResult<Vec<Server>>;

    async fn update_server_billing_state(
        &self,
        id: &ServerId,
        billing: &HourlyBillingState,
    ) -> StoreResult<()>;
}

/// Cells.
#[async_trait]
pub trait CellStore: Send + Sync {
    async fn create_cell(&self, cell: &Cell) -> StoreResult<()>;

    /// Fetch a cell with its member servers and talos data preloaded.
    async fn cell_by_id(&self, id: &CellId) -> StoreResult<Cell>;

    async fn cells_for_team(&self, team: &TeamId) -> StoreResult<Vec<Cell>>;

    async fn update_cell_talos_data(&self, id: &CellId, data: &TalosCellData) -> StoreResult<()>;

    /// Attach a server to a cell. Also sets the server's cell back-reference.
    async fn add_server_to_cell(&self, cell: &CellId, server: &ServerId) -> StoreResult<()>;
}

/// Apps and environments.
#[async_trait]
pub trait AppStore: Send + Sync {
    async fn create_app(&self, app: &App) -> StoreResult<()>;

    async fn app_by_id(&self, id: &AppId) -> StoreResult<App>;

    async fn apps_for_team(&self, team: &TeamId) -> StoreResult<Vec<App>>;

    async fn delete_app(&self, team: &TeamId, id: &AppId) -> StoreResult<()>;

    async fn create_env(&self, env: &Env) -> StoreResult<()>;

    async fn env_by_id(&self, id: &EnvId) -> StoreResult<Env>;

    async fn envs_for_team(&self, team: &TeamId) -> StoreResult<Vec<Env>>;

    async fn delete_env(&self, team: &TeamId, id: &EnvId) -> StoreResult<()>;
}

/// Immutable app-settings and env-var snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn create_app_settings(&self, settings: &AppSettings) -> StoreResult<()>;

    async fn app_settings_by_id(&self, id: &AppSettingsId) -> StoreResult<AppSettings>;

    async fn app_settings_for_app(&self, app: &AppId) -> StoreResult<Vec<AppSettings>>;

    async fn create_app_env_vars(&self, vars: &AppEnvVars) -> StoreResult<()>;

    async fn app_env_vars_by_id(&self, id: &AppEnvVarsId) -> StoreResult<AppEnvVars>;

    async fn app_env_vars_for(&self, app: &AppId, env: &EnvId) -> StoreResult<Vec<AppEnvVars>>;
}

/// Deployments.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a deployment, assigning the next monotonic sequence number
    /// within (app, env). Returns the stored row.
    async fn create_deployment(&self, deployment: &Deployment) -> StoreResult<Deployment>;

    async fn deployment_by_key(
        &self,
        app: &AppId,
        env: &EnvId,
        seq: i64,
    ) -> StoreResult<Deployment>;

    async fn deployments_for(&self, app: &AppId, env: &EnvId) -> StoreResult<Vec<Deployment>>;

    async fn update_deployment_status(
        &self,
        app: &AppId,
        env: &EnvId,
        seq: i64,
        status: DeploymentStatus,
        reason: &str,
    ) -> StoreResult<()>;
}

/// Build records.
#[async_trait]
pub trait BuildStore: Send + Sync {
    /// Create a pending build for an app.
    async fn init_build(
        &self,
        team: &TeamId,
        creator: &UserId,
        app: &AppId,
    ) -> StoreResult<Build>;

    async fn build_by_id(&self, id: &BuildId) -> StoreResult<Build>;

    async fn update_build_status(&self, id: &BuildId, status: BuildStatus) -> StoreResult<()>;

    async fn update_build_logs(&self, id: &BuildId, logs: &str) -> StoreResult<()>;

    async fn update_build_artifacts(
        &self,
        id: &BuildId,
        artifacts: &[ImageArtifact],
    ) -> StoreResult<()>;
}

/// The full store surface. Backends implement every repository trait and get
/// this for free.
pub trait Store:
    UserStore
    + TeamStore
    + ApiTokenStore
    + ServerStore
    + CellStore
    + AppStore
    + SnapshotStore
    + DeploymentStore
    + BuildStore
{
}

impl<T> Store for T where
    T: UserStore
        + TeamStore
        + ApiTokenStore
        + ServerStore
        + CellStore
        + AppStore
        + SnapshotStore
        + DeploymentStore
        + BuildStore
{
}
