//! Entity types persisted by the store.
//!
//! Relations between entities are foreign keys, never in-memory back
//! pointers. Aggregates such as [`Team`] and [`Cell`] carry their children
//! preloaded on read; writers always go through the repository traits.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use metal_core::{
    ApiTokenId, AppEnvVarsId, AppId, AppSettingsId, BuildId, CellId, EnvId, InviteId,
    OfferingId, PaymentMethodId, ServerId, TeamId, UserId,
};

/// A user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    /// Argon2id encoded hash string (`$argon2id$v=…$m=…,t=…,p=…$salt$hash`).
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership role within a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Admin,
    Member,
}

impl TeamRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

impl std::str::FromStr for TeamRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "member" => Ok(Self::Member),
            _ => Err(format!("unknown team role: {s}")),
        }
    }
}

/// A user's membership in a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub user_id: UserId,
    pub role: TeamRole,
}

/// An outstanding email invite to join a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamInvite {
    pub id: InviteId,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// A stored payment method. At most one per team is the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    /// Identifier of the method at the payment processor.
    pub external_id: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// The age keypair a team's cluster configs are encrypted under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgeKeypair {
    /// Public recipient, `age1…`.
    pub public_key: String,
    /// Private identity, `AGE-SECRET-KEY-1…`.
    pub private_key: String,
}

/// A team, the owner of all other resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    /// Customer id at the payment processor, once provisioned.
    pub billing_account_id: Option<String>,
    pub age_keypair: AgeKeypair,
    pub members: Vec<TeamMember>,
    pub invites: Vec<TeamInvite>,
    pub payment_methods: Vec<PaymentMethod>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Team {
    /// Whether the given user is a member of this team.
    #[must_use]
    pub fn has_member(&self, user_id: &UserId) -> bool {
        self.members.iter().any(|m| &m.user_id == user_id)
    }

    /// The default payment method, if any method exists.
    #[must_use]
    pub fn default_payment_method(&self) -> Option<&PaymentMethod> {
        self.payment_methods.iter().find(|pm| pm.is_default)
    }
}

/// An API token row. The secret itself is returned to the caller exactly
/// once, at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiToken {
    pub id: ApiTokenId,
    pub team_id: TeamId,
    pub creator_id: UserId,
    pub name: String,
    pub scope: String,
    pub token: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle states of a purchased server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerStatus {
    /// Awaiting checkout confirmation.
    PendingPayment,
    /// Paid; awaiting the hardware vendor.
    PendingProvider,
    /// Online and serving.
    Running,
    /// Online but cancellation has been requested. Valid state with no
    /// producer in the control loops.
    RunningCanceled,
    /// Returned to the vendor.
    Destroyed,
}

impl ServerStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending-payment",
            Self::PendingProvider => "pending-provider",
            Self::Running => "running",
            Self::RunningCanceled => "running-canceled",
            Self::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ServerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending-payment" => Ok(Self::PendingPayment),
            "pending-provider" => Ok(Self::PendingProvider),
            "running" => Ok(Self::Running),
            "running-canceled" => Ok(Self::RunningCanceled),
            "destroyed" => Ok(Self::Destroyed),
            _ => Err(format!("unknown server status: {s}")),
        }
    }
}

/// Hourly metering progress attached to a server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HourlyBillingState {
    pub last_event_sent_at: Option<DateTime<Utc>>,
    pub event_name: String,
}

/// A team-owned record of a purchased machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub team_id: TeamId,
    pub offering_id: OfferingId,
    pub location: String,
    pub status: ServerStatus,
    /// Vendor slug; must be set whenever `provider_id` is set.
    pub provider_slug: Option<String>,
    /// Server id at the hardware vendor.
    pub provider_id: Option<String>,
    pub public_ipv4: Option<String>,
    /// The cell this server belongs to, if attached.
    pub cell_id: Option<CellId>,
    pub billing: HourlyBillingState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker; set when the server is destroyed.
    pub deleted_at: Option<DateTime<Utc>>,
}

/// The kind of cluster a cell runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Talos,
}

impl CellType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Talos => "talos",
        }
    }
}

impl fmt::Display for CellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CellType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "talos" => Ok(Self::Talos),
            _ => Err(format!("unknown cell type: {s}")),
        }
    }
}

/// Cluster credentials produced by the cell provisioner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TalosCellData {
    pub talosconfig: String,
    pub kubeconfig: String,
    /// `.tar.gz` of the committed cluster config working tree.
    pub config_archive: Vec<u8>,
}

/// A cluster of servers for a team.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: CellId,
    pub team_id: TeamId,
    pub name: String,
    pub cell_type: CellType,
    /// Member servers, preloaded on read.
    pub servers: Vec<ServerId>,
    pub talos: Option<TalosCellData>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named environment within a team. Unique by (team, name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Env {
    pub id: EnvId,
    pub team_id: TeamId,
    pub creator_id: UserId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user-level workload. Unique by (team, name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub team_id: TeamId,
    pub creator_id: UserId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A declared container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub port: u16,
    pub proto: String,
}

/// CPU/memory requests and limits for an app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub cpu_cores: f64,
    pub memory_mib: u64,
}

/// Immutable snapshot of an app's desired shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub id: AppSettingsId,
    pub app_id: AppId,
    pub image: String,
    pub ports: Vec<PortSpec>,
    /// Ports exposed outside the cell.
    pub external_ports: Vec<u16>,
    pub requests: ResourceSpec,
    pub limits: ResourceSpec,
    pub created_at: DateTime<Utc>,
}

/// Immutable snapshot of the env-var map for (app, env).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppEnvVars {
    pub id: AppEnvVarsId,
    pub app_id: AppId,
    pub env_id: EnvId,
    pub vars: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle states of a deployment. `Running` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Running,
    Failed,
}

impl DeploymentStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deploying => "deploying",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Running | Self::Failed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "deploying" => Ok(Self::Deploying),
            "running" => Ok(Self::Running),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown deployment status: {s}")),
        }
    }
}

/// The join of an app, an environment, and the snapshots to run there.
///
/// Deployments are numbered monotonically within (app, env); the triple
/// `(app_id, env_id, seq)` is the primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub app_id: AppId,
    pub env_id: EnvId,
    pub seq: i64,
    pub team_id: TeamId,
    /// Only `deploy` is exercised today.
    pub deploy_type: String,
    pub app_settings_id: AppSettingsId,
    pub app_env_vars_id: AppEnvVarsId,
    /// Target cells; at least one, all belonging to `team_id`.
    pub cell_ids: Vec<CellId>,
    pub replicas: u32,
    pub status: DeploymentStatus,
    pub status_reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle states of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl BuildStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown build status: {s}")),
        }
    }
}

/// A container image produced by a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    /// Full pullable reference, registry included.
    pub reference: String,
}

/// An artifact-production record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub id: BuildId,
    pub team_id: TeamId,
    pub creator_id: UserId,
    pub app_id: AppId,
    pub status: BuildStatus,
    pub logs: String,
    pub artifacts: Vec<ImageArtifact>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
