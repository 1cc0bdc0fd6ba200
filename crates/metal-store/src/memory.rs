//! In-memory store backend for testing.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use metal_core::{
    ApiTokenId, AppEnvVarsId, AppId, AppSettingsId, BuildId, CellId, EnvId, InviteId,
    PaymentMethodId, ServerId, TeamId, TypedId, UserId,
};

use crate::error::{Entity, StoreError, StoreResult};
use crate::traits::{
    ApiTokenStore, AppStore, BuildStore, CellStore, DeploymentStore, ServerStore, SnapshotStore,
    TeamStore, UserStore,
};
use crate::types::{
    ApiToken, App, AppEnvVars, AppSettings, Build, BuildStatus, Cell, Deployment,
    DeploymentStatus, Env, HourlyBillingState, ImageArtifact, PaymentMethod, Server,
    ServerStatus, TalosCellData, Team, TeamInvite, TeamMember, TeamRole, User,
};
use crate::{password, secrets};

/// In-memory store. Data is lost when the process exits; only suitable for
/// tests and local development.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    teams: RwLock<HashMap<String, Team>>,
    tokens: RwLock<HashMap<String, ApiToken>>,
    servers: RwLock<HashMap<String, Server>>,
    cells: RwLock<HashMap<String, Cell>>,
    apps: RwLock<HashMap<String, App>>,
    envs: RwLock<HashMap<String, Env>>,
    app_settings: RwLock<HashMap<String, AppSettings>>,
    app_env_vars: RwLock<HashMap<String, AppEnvVars>>,
    deployments: RwLock<HashMap<(String, String, i64), Deployment>>,
    builds: RwLock<HashMap<String, Build>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned(_: impl std::fmt::Debug) -> StoreError {
    StoreError::internal("lock poisoned")
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, email: &str, pw: &str) -> StoreResult<User> {
        let hash = password::hash(pw)?;
        let mut users = self.users.write().map_err(poisoned)?;
        if users.values().any(|u| u.email == email) {
            return Err(StoreError::conflict(Entity::User, email));
        }
        let now = Utc::now();
        let user = User {
            id: UserId::generate(),
            email: email.to_owned(),
            password_hash: hash,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id.as_str().to_owned(), user.clone());
        Ok(user)
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<User> {
        let users = self.users.read().map_err(poisoned)?;
        users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::User))
    }

    async fn user_by_id(&self, id: &UserId) -> StoreResult<User> {
        let users = self.users.read().map_err(poisoned)?;
        users
            .get(id.as_str())
            .cloned()
            .ok_or(StoreError::NotFound(Entity::User))
    }
}

#[async_trait]
impl TeamStore for MemoryStore {
    async fn create_team(&self, name: &str, creator: &UserId) -> StoreResult<Team> {
        let mut teams = self.teams.write().map_err(poisoned)?;
        let now = Utc::now();
        let team = Team {
            id: TeamId::generate(),
            name: name.to_owned(),
            billing_account_id: None,
            age_keypair: secrets::generate_age_keypair(),
            members: vec![TeamMember {
                user_id: creator.clone(),
                role: TeamRole::Admin,
            }],
            invites: Vec::new(),
            payment_methods: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        teams.insert(team.id.as_str().to_owned(), team.clone());
        Ok(team)
    }

    async fn team_by_id(&self, id: &TeamId) -> StoreResult<Team> {
        let teams = self.teams.read().map_err(poisoned)?;
        teams
            .get(id.as_str())
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Team))
    }

    async fn teams_for_user(&self, user: &UserId) -> StoreResult<Vec<Team>> {
        let teams = self.teams.read().map_err(poisoned)?;
        Ok(teams
            .values()
            .filter(|t| t.has_member(user))
            .cloned()
            .collect())
    }

    async fn add_member(&self, team: &TeamId, user: &UserId, role: TeamRole) -> StoreResult<()> {
        let mut teams = self.teams.write().map_err(poisoned)?;
        let team = teams
            .get_mut(team.as_str())
            .ok_or(StoreError::NotFound(Entity::Team))?;
        if team.has_member(user) {
            return Err(StoreError::conflict(Entity::Team, user.as_str()));
        }
        team.members.push(TeamMember {
            user_id: user.clone(),
            role,
        });
        team.updated_at = Utc::now();
        Ok(())
    }

    async fn remove_member(&self, team: &TeamId, user: &UserId) -> StoreResult<()> {
        let mut teams = self.teams.write().map_err(poisoned)?;
        let team = teams
            .get_mut(team.as_str())
            .ok_or(StoreError::NotFound(Entity::Team))?;
        let before = team.members.len();
        team.members.retain(|m| &m.user_id != user);
        if team.members.len() == before {
            return Err(StoreError::NotFound(Entity::User));
        }
        team.updated_at = Utc::now();
        Ok(())
    }

    async fn create_invite(&self, team: &TeamId, email: &str) -> StoreResult<TeamInvite> {
        let mut teams = self.teams.write().map_err(poisoned)?;
        let team = teams
            .get_mut(team.as_str())
            .ok_or(StoreError::NotFound(Entity::Team))?;
        let invite = TeamInvite {
            id: InviteId::generate(),
            email: email.to_owned(),
            created_at: Utc::now(),
        };
        team.invites.push(invite.clone());
        Ok(invite)
    }

    async fn delete_invite(&self, team: &TeamId, invite: &InviteId) -> StoreResult<()> {
        let mut teams = self.teams.write().map_err(poisoned)?;
        let team = teams
            .get_mut(team.as_str())
            .ok_or(StoreError::NotFound(Entity::Team))?;
        let before = team.invites.len();
        team.invites.retain(|i| &i.id != invite);
        if team.invites.len() == before {
            return Err(StoreError::NotFound(Entity::Invite));
        }
        Ok(())
    }

    async fn invites_for_email(&self, email: &str) -> StoreResult<Vec<(TeamId, TeamInvite)>> {
        let teams = self.teams.read().map_err(poisoned)?;
        Ok(teams
            .values()
            .flat_map(|t| {
                t.invites
                    .iter()
                    .filter(|i| i.email == email)
                    .map(|i| (t.id.clone(), i.clone()))
            })
            .collect())
    }

    async fn set_billing_account(&self, team: &TeamId, external_id: &str) -> StoreResult<()> {
        let mut teams = self.teams.write().map_err(poisoned)?;
        let team = teams
            .get_mut(team.as_str())
            .ok_or(StoreError::NotFound(Entity::Team))?;
        team.billing_account_id = Some(external_id.to_owned());
        team.updated_at = Utc::now();
        Ok(())
    }

    async fn add_payment_method(
        &self,
        team: &TeamId,
        external_id: &str,
    ) -> StoreResult<PaymentMethod> {
        let mut teams = self.teams.write().map_err(poisoned)?;
        let team = teams
            .get_mut(team.as_str())
            .ok_or(StoreError::NotFound(Entity::Team))?;
        let method = PaymentMethod {
            id: PaymentMethodId::generate(),
            external_id: external_id.to_owned(),
            is_default: team.payment_methods.is_empty(),
            created_at: Utc::now(),
        };
        team.payment_methods.push(method.clone());
        team.updated_at = Utc::now();
        Ok(method)
    }

    async fn remove_payment_method(
        &self,
        team: &TeamId,
        id: &PaymentMethodId,
    ) -> StoreResult<()> {
        let mut teams = self.teams.write().map_err(poisoned)?;
        let team = teams
            .get_mut(team.as_str())
            .ok_or(StoreError::NotFound(Entity::Team))?;
        let before = team.payment_methods.len();
        team.payment_methods.retain(|pm| &pm.id != id);
        if team.payment_methods.len() == before {
            return Err(StoreError::NotFound(Entity::PaymentMethod));
        }
        // Keep exactly one default while any method remains.
        if !team.payment_methods.iter().any(|pm| pm.is_default) {
            if let Some(first) = team.payment_methods.first_mut() {
                first.is_default = true;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ApiTokenStore for MemoryStore {
    async fn create_token(
        &self,
        team: &TeamId,
        creator: &UserId,
        name: &str,
        scope: &str,
    ) -> StoreResult<ApiToken> {
        let mut tokens = self.tokens.write().map_err(poisoned)?;
        let token = ApiToken {
            id: ApiTokenId::generate(),
            team_id: team.clone(),
            creator_id: creator.clone(),
            name: name.to_owned(),
            scope: scope.to_owned(),
            token: secrets::generate_token(),
            last_used_at: None,
            created_at: Utc::now(),
        };
        tokens.insert(token.id.as_str().to_owned(), token.clone());
        Ok(token)
    }

    async fn token_by_token(&self, token: &str) -> StoreResult<ApiToken> {
        let tokens = self.tokens.read().map_err(poisoned)?;
        tokens
            .values()
            .find(|t| t.token == token)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::ApiToken))
    }

    async fn tokens_for_team(&self, team: &TeamId) -> StoreResult<Vec<ApiToken>> {
        let tokens = self.tokens.read().map_err(poisoned)?;
        Ok(tokens
            .values()
            .filter(|t| &t.team_id == team)
            .cloned()
            .collect())
    }

    async fn delete_token(&self, team: &TeamId, id: &ApiTokenId) -> StoreResult<()> {
        let mut tokens = self.tokens.write().map_err(poisoned)?;
        match tokens.get(id.as_str()) {
            Some(t) if &t.team_id == team => {
                tokens.remove(id.as_str());
                Ok(())
            }
            _ => Err(StoreError::NotFound(Entity::ApiToken)),
        }
    }

    async fn touch_token_last_used(&self, id: &ApiTokenId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tokens = self.tokens.write().map_err(poisoned)?;
        let token = tokens
            .get_mut(id.as_str())
            .ok_or(StoreError::NotFound(Entity::ApiToken))?;
        token.last_used_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl ServerStore for MemoryStore {
    async fn create_server(&self, server: &Server) -> StoreResult<()> {
        let mut servers = self.servers.write().map_err(poisoned)?;
        let key = server.id.as_str().to_owned();
        if servers.contains_key(&key) {
            return Err(StoreError::conflict(Entity::Server, key));
        }
        servers.insert(key, server.clone());
        Ok(())
    }

    async fn server_by_id(&self, id: &ServerId) -> StoreResult<Server> {
        let servers = self.servers.read().map_err(poisoned)?;
        servers
            .get(id.as_str())
            .filter(|s| s.deleted_at.is_none())
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Server))
    }

    async fn update_server_status(&self, id: &ServerId, status: ServerStatus) -> StoreResult<()> {
        let mut servers = self.servers.write().map_err(poisoned)?;
        let server = servers
            .get_mut(id.as_str())
            .ok_or(StoreError::NotFound(Entity::Server))?;
        server.status = status;
        server.updated_at = Utc::now();
        if status == ServerStatus::Destroyed {
            server.deleted_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn update_server_public_ipv4(&self, id: &ServerId, ipv4: &str) -> StoreResult<()> {
        let mut servers = self.servers.write().map_err(poisoned)?;
        let server = servers
            .get_mut(id.as_str())
            .ok_or(StoreError::NotFound(Entity::Server))?;
        server.public_ipv4 = Some(ipv4.to_owned());
        server.updated_at = Utc::now();
        Ok(())
    }

    async fn update_server_provider_id(
        &self,
        id: &ServerId,
        provider_slug: &str,
        provider_id: &str,
    ) -> StoreResult<()> {
        let mut servers = self.servers.write().map_err(poisoned)?;
        let server = servers
            .get_mut(id.as_str())
            .ok_or(StoreError::NotFound(Entity::Server))?;
        server.provider_slug = Some(provider_slug.to_owned());
        server.provider_id = Some(provider_id.to_owned());
        server.updated_at = Utc::now();
        Ok(())
    }

    async fn servers_for_team(&self, team: &TeamId) -> StoreResult<Vec<Server>> {
        let servers = self.servers.read().map_err(poisoned)?;
        Ok(servers
            .values()
            .filter(|s| &s.team_id == team && s.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn update_server_billing_state(
        &self,
        id: &ServerId,
        billing: &HourlyBillingState,
    ) -> StoreResult<()> {
        let mut servers = self.servers.write().map_err(poisoned)?;
        let server = servers
            .get_mut(id.as_str())
            .ok_or(StoreError::NotFound(Entity::Server))?;
        server.billing = billing.clone();
        server.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl CellStore for MemoryStore {
    async fn create_cell(&self, cell: &Cell) -> StoreResult<()> {
        let mut cells = self.cells.write().map_err(poisoned)?;
        let key = cell.id.as_str().to_owned();
        if cells.contains_key(&key) {
            return Err(StoreError::conflict(Entity::Cell, key));
        }
        cells.insert(key, cell.clone());
        drop(cells);
        for server in &cell.servers {
            let mut servers = self.servers.write().map_err(poisoned)?;
            if let Some(s) = servers.get_mut(server.as_str()) {
                s.cell_id = Some(cell.id.clone());
            }
        }
        Ok(())
    }

    async fn cell_by_id(&self, id: &CellId) -> StoreResult<Cell> {
        let cells = self.cells.read().map_err(poisoned)?;
        cells
            .get(id.as_str())
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Cell))
    }

    async fn cells_for_team(&self, team: &TeamId) -> StoreResult<Vec<Cell>> {
        let cells = self.cells.read().map_err(poisoned)?;
        Ok(cells
            .values()
            .filter(|c| &c.team_id == team)
            .cloned()
            .collect())
    }

    async fn update_cell_talos_data(&self, id: &CellId, data: &TalosCellData) -> StoreResult<()> {
        let mut cells = self.cells.write().map_err(poisoned)?;
        let cell = cells
            .get_mut(id.as_str())
            .ok_or(StoreError::NotFound(Entity::Cell))?;
        cell.talos = Some(data.clone());
        cell.updated_at = Utc::now();
        Ok(())
    }

    async fn add_server_to_cell(&self, cell: &CellId, server: &ServerId) -> StoreResult<()> {
        {
            let mut cells = self.cells.write().map_err(poisoned)?;
            let cell_row = cells
                .get_mut(cell.as_str())
                .ok_or(StoreError::NotFound(Entity::Cell))?;
            if !cell_row.servers.contains(server) {
                cell_row.servers.push(server.clone());
                cell_row.updated_at = Utc::now();
            }
        }
        let mut servers = self.servers.write().map_err(poisoned)?;
        let server_row = servers
            .get_mut(server.as_str())
            .ok_or(StoreError::NotFound(Entity::Server))?;
        server_row.cell_id = Some(cell.clone());
        server_row.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl AppStore for MemoryStore {
    async fn create_app(&self, app: &App) -> StoreResult<()> {
        let mut apps = self.apps.write().map_err(poisoned)?;
        let key = app.id.as_str().to_owned();
        if apps.contains_key(&key) {
            return Err(StoreError::conflict(Entity::App, key));
        }
        if apps
            .values()
            .any(|a| a.team_id == app.team_id && a.name == app.name)
        {
            return Err(StoreError::conflict(Entity::App, &app.name));
        }
        apps.insert(key, app.clone());
        Ok(())
    }

    async fn app_by_id(&self, id: &AppId) -> StoreResult<App> {
        let apps = self.apps.read().map_err(poisoned)?;
        apps.get(id.as_str())
            .cloned()
            .ok_or(StoreError::NotFound(Entity::App))
    }

    async fn apps_for_team(&self, team: &TeamId) -> StoreResult<Vec<App>> {
        let apps = self.apps.read().map_err(poisoned)?;
        let mut result: Vec<_> = apps
            .values()
            .filter(|a| &a.team_id == team)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn delete_app(&self, team: &TeamId, id: &AppId) -> StoreResult<()> {
        let mut apps = self.apps.write().map_err(poisoned)?;
        match apps.get(id.as_str()) {
            Some(a) if &a.team_id == team => {
                apps.remove(id.as_str());
                Ok(())
            }
            _ => Err(StoreError::NotFound(Entity::App)),
        }
    }

    async fn create_env(&self, env: &Env) -> StoreResult<()> {
        let mut envs = self.envs.write().map_err(poisoned)?;
        let key = env.id.as_str().to_owned();
        if envs.contains_key(&key) {
            return Err(StoreError::conflict(Entity::Env, key));
        }
        if envs
            .values()
            .any(|e| e.team_id == env.team_id && e.name == env.name)
        {
            return Err(StoreError::conflict(Entity::Env, &env.name));
        }
        envs.insert(key, env.clone());
        Ok(())
    }

    async fn env_by_id(&self, id: &EnvId) -> StoreResult<Env> {
        let envs = self.envs.read().map_err(poisoned)?;
        envs.get(id.as_str())
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Env))
    }

    async fn envs_for_team(&self, team: &TeamId) -> StoreResult<Vec<Env>> {
        let envs = self.envs.read().map_err(poisoned)?;
        let mut result: Vec<_> = envs
            .values()
            .filter(|e| &e.team_id == team)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn delete_env(&self, team: &TeamId, id: &EnvId) -> StoreResult<()> {
        let mut envs = self.envs.write().map_err(poisoned)?;
        match envs.get(id.as_str()) {
            Some(e) if &e.team_id == team => {
                envs.remove(id.as_str());
                Ok(())
            }
            _ => Err(StoreError::NotFound(Entity::Env)),
        }
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn create_app_settings(&self, settings: &AppSettings) -> StoreResult<()> {
        let mut all = self.app_settings.write().map_err(poisoned)?;
        let key = settings.id.as_str().to_owned();
        if all.contains_key(&key) {
            return Err(StoreError::conflict(Entity::AppSettings, key));
        }
        all.insert(key, settings.clone());
        Ok(())
    }

    async fn app_settings_by_id(&self, id: &AppSettingsId) -> StoreResult<AppSettings> {
        let all = self.app_settings.read().map_err(poisoned)?;
        all.get(id.as_str())
            .cloned()
            .ok_or(StoreError::NotFound(Entity::AppSettings))
    }

    async fn app_settings_for_app(&self, app: &AppId) -> StoreResult<Vec<AppSettings>> {
        let all = self.app_settings.read().map_err(poisoned)?;
        let mut result: Vec<_> = all.values().filter(|s| &s.app_id == app).cloned().collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn create_app_env_vars(&self, vars: &AppEnvVars) -> StoreResult<()> {
        let mut all = self.app_env_vars.write().map_err(poisoned)?;
        let key = vars.id.as_str().to_owned();
        if all.contains_key(&key) {
            return Err(StoreError::conflict(Entity::AppEnvVars, key));
        }
        all.insert(key, vars.clone());
        Ok(())
    }

    async fn app_env_vars_by_id(&self, id: &AppEnvVarsId) -> StoreResult<AppEnvVars> {
        let all = self.app_env_vars.read().map_err(poisoned)?;
        all.get(id.as_str())
            .cloned()
            .ok_or(StoreError::NotFound(Entity::AppEnvVars))
    }

    async fn app_env_vars_for(&self, app: &AppId, env: &EnvId) -> StoreResult<Vec<AppEnvVars>> {
        let all = self.app_env_vars.read().map_err(poisoned)?;
        let mut result: Vec<_> = all
            .values()
            .filter(|v| &v.app_id == app && &v.env_id == env)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn create_deployment(&self, deployment: &Deployment) -> StoreResult<Deployment> {
        let mut deployments = self.deployments.write().map_err(poisoned)?;
        let next_seq = deployments
            .keys()
            .filter(|(app, env, _)| {
                app == deployment.app_id.as_str() && env == deployment.env_id.as_str()
            })
            .map(|(_, _, seq)| *seq)
            .max()
            .unwrap_or(0)
            + 1;
        let mut stored = deployment.clone();
        stored.seq = next_seq;
        deployments.insert(
            (
                stored.app_id.as_str().to_owned(),
                stored.env_id.as_str().to_owned(),
                next_seq,
            ),
            stored.clone(),
        );
        Ok(stored)
    }

    async fn deployment_by_key(
        &self,
        app: &AppId,
        env: &EnvId,
        seq: i64,
    ) -> StoreResult<Deployment> {
        let deployments = self.deployments.read().map_err(poisoned)?;
        deployments
            .get(&(app.as_str().to_owned(), env.as_str().to_owned(), seq))
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Deployment))
    }

    async fn deployments_for(&self, app: &AppId, env: &EnvId) -> StoreResult<Vec<Deployment>> {
        let deployments = self.deployments.read().map_err(poisoned)?;
        let mut result: Vec<_> = deployments
            .values()
            .filter(|d| &d.app_id == app && &d.env_id == env)
            .cloned()
            .collect();
        result.sort_by_key(|d| d.seq);
        Ok(result)
    }

    async fn update_deployment_status(
        &self,
        app: &AppId,
        env: &EnvId,
        seq: i64,
        status: DeploymentStatus,
        reason: &str,
    ) -> StoreResult<()> {
        let mut deployments = self.deployments.write().map_err(poisoned)?;
        let deployment = deployments
            .get_mut(&(app.as_str().to_owned(), env.as_str().to_owned(), seq))
            .ok_or(StoreError::NotFound(Entity::Deployment))?;
        deployment.status = status;
        deployment.status_reason = reason.to_owned();
        deployment.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl BuildStore for MemoryStore {
    async fn init_build(
        &self,
        team: &TeamId,
        creator: &UserId,
        app: &AppId,
    ) -> StoreResult<Build> {
        let mut builds = self.builds.write().map_err(poisoned)?;
        let now = Utc::now();
        let build = Build {
            id: BuildId::generate(),
            team_id: team.clone(),
            creator_id: creator.clone(),
            app_id: app.clone(),
            status: BuildStatus::Pending,
            logs: String::new(),
            artifacts: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        builds.insert(build.id.as_str().to_owned(), build.clone());
        Ok(build)
    }

    async fn build_by_id(&self, id: &BuildId) -> StoreResult<Build> {
        let builds = self.builds.read().map_err(poisoned)?;
        builds
            .get(id.as_str())
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Build))
    }

    async fn update_build_status(&self, id: &BuildId, status: BuildStatus) -> StoreResult<()> {
        let mut builds = self.builds.write().map_err(poisoned)?;
        let build = builds
            .get_mut(id.as_str())
            .ok_or(StoreError::NotFound(Entity::Build))?;
        build.status = status;
        build.updated_at = Utc::now();
        Ok(())
    }

    async fn update_build_logs(&self, id: &BuildId, logs: &str) -> StoreResult<()> {
        let mut builds = self.builds.write().map_err(poisoned)?;
        let build = builds
            .get_mut(id.as_str())
            .ok_or(StoreError::NotFound(Entity::Build))?;
        build.logs = logs.to_owned();
        build.updated_at = Utc::now();
        Ok(())
    }

    async fn update_build_artifacts(
        &self,
        id: &BuildId,
        artifacts: &[ImageArtifact],
    ) -> StoreResult<()> {
        let mut builds = self.builds.write().map_err(poisoned)?;
        let build = builds
            .get_mut(id.as_str())
            .ok_or(StoreError::NotFound(Entity::Build))?;
        build.artifacts = artifacts.to_vec();
        build.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures;

    #[tokio::test]
    async fn user_create_and_lookup() {
        let store = MemoryStore::new();
        let user = store
            .create_user("dev@example.com", "hunter2hunter2")
            .await
            .expect("create");
        assert!(user.password_hash.starts_with("$argon2id$"));

        let by_email = store.user_by_email("dev@example.com").await.expect("get");
        assert_eq!(by_email.id, user.id);

        let dup = store.create_user("dev@example.com", "other").await;
        assert!(dup.is_err_and(|e| e.is_conflict()));
    }

    #[tokio::test]
    async fn team_creator_is_admin_and_keypair_generated() {
        let store = MemoryStore::new();
        let user = store
            .create_user("dev@example.com", "pw-pw-pw-pw")
            .await
            .expect("create user");
        let team = store.create_team("acme", &user.id).await.expect("create");

        assert!(team.has_member(&user.id));
        assert_eq!(team.members[0].role, TeamRole::Admin);
        assert!(team.age_keypair.public_key.starts_with("age1"));
        assert!(team.age_keypair.private_key.starts_with("AGE-SECRET-KEY-1"));
    }

    #[tokio::test]
    async fn first_payment_method_becomes_default() {
        let store = MemoryStore::new();
        let user = store
            .create_user("dev@example.com", "pw-pw-pw-pw")
            .await
            .expect("user");
        let team = store.create_team("acme", &user.id).await.expect("team");

        let first = store
            .add_payment_method(&team.id, "pm_ext_1")
            .await
            .expect("add");
        let second = store
            .add_payment_method(&team.id, "pm_ext_2")
            .await
            .expect("add");
        assert!(first.is_default);
        assert!(!second.is_default);

        let loaded = store.team_by_id(&team.id).await.expect("get");
        let defaults = loaded
            .payment_methods
            .iter()
            .filter(|pm| pm.is_default)
            .count();
        assert_eq!(defaults, 1);
    }

    #[tokio::test]
    async fn removing_default_promotes_another() {
        let store = MemoryStore::new();
        let user = store
            .create_user("dev@example.com", "pw-pw-pw-pw")
            .await
            .expect("user");
        let team = store.create_team("acme", &user.id).await.expect("team");
        let first = store
            .add_payment_method(&team.id, "pm_ext_1")
            .await
            .expect("add");
        store
            .add_payment_method(&team.id, "pm_ext_2")
            .await
            .expect("add");

        store
            .remove_payment_method(&team.id, &first.id)
            .await
            .expect("remove");
        let loaded = store.team_by_id(&team.id).await.expect("get");
        assert_eq!(loaded.payment_methods.len(), 1);
        assert!(loaded.payment_methods[0].is_default);
    }

    #[tokio::test]
    async fn api_token_round_trips() {
        let store = MemoryStore::new();
        let user = store
            .create_user("dev@example.com", "pw-pw-pw-pw")
            .await
            .expect("user");
        let team = store.create_team("acme", &user.id).await.expect("team");

        let created = store
            .create_token(&team.id, &user.id, "laptop", "api")
            .await
            .expect("create");
        assert_eq!(created.token.len(), secrets::TOKEN_LENGTH);

        let looked_up = store.token_by_token(&created.token).await.expect("lookup");
        assert_eq!(looked_up.id, created.id);
        assert_eq!(looked_up.token, created.token);
    }

    #[tokio::test]
    async fn provider_id_always_carries_slug() {
        let store = MemoryStore::new();
        let server = test_fixtures::server();
        store.create_server(&server).await.expect("create");

        store
            .update_server_provider_id(&server.id, "latitude", "sv-1234")
            .await
            .expect("update");

        let loaded = store.server_by_id(&server.id).await.expect("get");
        assert!(loaded.provider_id.is_some());
        assert!(loaded.provider_slug.is_some());
    }

    #[tokio::test]
    async fn add_server_to_cell_sets_back_reference() {
        let store = MemoryStore::new();
        let server = test_fixtures::server();
        store.create_server(&server).await.expect("create server");
        let cell = test_fixtures::cell(&server.team_id, &[]);
        store.create_cell(&cell).await.expect("create cell");

        store
            .add_server_to_cell(&cell.id, &server.id)
            .await
            .expect("attach");

        let cell = store.cell_by_id(&cell.id).await.expect("get cell");
        assert_eq!(cell.servers, vec![server.id.clone()]);
        let server = store.server_by_id(&server.id).await.expect("get server");
        assert_eq!(server.cell_id, Some(cell.id));
    }

    #[tokio::test]
    async fn deployment_seq_is_monotonic_per_app_env() {
        let store = MemoryStore::new();
        let d = test_fixtures::deployment();

        let first = store.create_deployment(&d).await.expect("create");
        let second = store.create_deployment(&d).await.expect("create");
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);

        let mut other = d.clone();
        other.env_id = EnvId::generate();
        let other_first = store.create_deployment(&other).await.expect("create");
        assert_eq!(other_first.seq, 1);
    }

    #[tokio::test]
    async fn deployment_status_update() {
        let store = MemoryStore::new();
        let d = store
            .create_deployment(&test_fixtures::deployment())
            .await
            .expect("create");

        store
            .update_deployment_status(
                &d.app_id,
                &d.env_id,
                d.seq,
                DeploymentStatus::Failed,
                "no cells associated with deployment",
            )
            .await
            .expect("update");

        let loaded = store
            .deployment_by_key(&d.app_id, &d.env_id, d.seq)
            .await
            .expect("get");
        assert_eq!(loaded.status, DeploymentStatus::Failed);
        assert_eq!(loaded.status_reason, "no cells associated with deployment");
    }

    #[tokio::test]
    async fn duplicate_app_name_in_team_conflicts() {
        let store = MemoryStore::new();
        let app = test_fixtures::app();
        store.create_app(&app).await.expect("create");

        let mut dup = test_fixtures::app();
        dup.team_id = app.team_id.clone();
        dup.name = app.name.clone();
        let result = store.create_app(&dup).await;
        assert!(result.is_err_and(|e| e.is_conflict()));
    }

    #[tokio::test]
    async fn destroyed_server_is_soft_deleted() {
        let store = MemoryStore::new();
        let server = test_fixtures::server();
        store.create_server(&server).await.expect("create");

        store
            .update_server_status(&server.id, ServerStatus::Destroyed)
            .await
            .expect("update");

        let result = store.server_by_id(&server.id).await;
        assert!(result.is_err_and(|e| e.is_not_found(Entity::Server)));
        let listed = store
            .servers_for_team(&server.team_id)
            .await
            .expect("list");
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn build_lifecycle() {
        let store = MemoryStore::new();
        let team = TeamId::generate();
        let user = UserId::generate();
        let app = AppId::generate();

        let build = store.init_build(&team, &user, &app).await.expect("init");
        assert_eq!(build.status, BuildStatus::Pending);

        store
            .update_build_status(&build.id, BuildStatus::Succeeded)
            .await
            .expect("status");
        store
            .update_build_logs(&build.id, "pushed image")
            .await
            .expect("logs");
        store
            .update_build_artifacts(
                &build.id,
                &[ImageArtifact {
                    reference: "registry.example/app:1".to_owned(),
                }],
            )
            .await
            .expect("artifacts");

        let loaded = store.build_by_id(&build.id).await.expect("get");
        assert_eq!(loaded.status, BuildStatus::Succeeded);
        assert_eq!(loaded.logs, "pushed image");
        assert_eq!(loaded.artifacts.len(), 1);
    }
}
