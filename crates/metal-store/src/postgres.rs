//! PostgreSQL store backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;

use metal_core::{
    ApiTokenId, AppEnvVarsId, AppId, AppSettingsId, BuildId, CellId, EnvId, InviteId,
    OfferingId, PaymentMethodId, ServerId, TeamId, TypedId, UserId,
};

use crate::error::{Entity, StoreError, StoreResult};
use crate::traits::{
    ApiTokenStore, AppStore, BuildStore, CellStore, DeploymentStore, ServerStore, SnapshotStore,
    TeamStore, UserStore,
};
use crate::types::{
    AgeKeypair, ApiToken, App, AppEnvVars, AppSettings, Build, BuildStatus, Cell, Deployment,
    DeploymentStatus, Env, HourlyBillingState, ImageArtifact, PaymentMethod, PortSpec,
    ResourceSpec, Server, ServerStatus, TalosCellData, Team, TeamInvite, TeamMember, User,
};
use crate::{password, secrets};

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

/// Postgres error code for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

fn insert_error(entity: Entity, key: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| {
        if let sqlx::Error::Database(ref db) = e {
            if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
                return StoreError::conflict(entity, key);
            }
        }
        StoreError::Database(e)
    }
}

fn parse_with<T: std::str::FromStr<Err = String>>(value: &str) -> StoreResult<T> {
    value.parse().map_err(StoreError::Corrupt)
}

impl PostgresStore {
    /// Connect to PostgreSQL and create the store. Required tables are
    /// created if they don't exist.
    pub async fn new(url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// The underlying pool, shared with the queue backend.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn row_to_user(row: &PgRow) -> User {
        User {
            id: UserId::new(row.get::<String, _>("id")),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_team(row: &PgRow) -> Team {
        Team {
            id: TeamId::new(row.get::<String, _>("id")),
            name: row.get("name"),
            billing_account_id: row.get("billing_account_id"),
            age_keypair: AgeKeypair {
                public_key: row.get("age_public_key"),
                private_key: row.get("age_private_key"),
            },
            members: Vec::new(),
            invites: Vec::new(),
            payment_methods: Vec::new(),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    async fn preload_team(&self, mut team: Team) -> StoreResult<Team> {
        let members = sqlx::query(
            "SELECT user_id, role FROM team_members WHERE team_id = $1 ORDER BY user_id",
        )
        .bind(team.id.as_str())
        .fetch_all(&self.pool)
        .await?;
        for row in &members {
            team.members.push(TeamMember {
                user_id: UserId::new(row.get::<String, _>("user_id")),
                role: parse_with(row.get::<String, _>("role").as_str())?,
            });
        }

        let invites = sqlx::query(
            "SELECT id, email, created_at FROM team_invites WHERE team_id = $1 ORDER BY created_at",
        )
        .bind(team.id.as_str())
        .fetch_all(&self.pool)
        .await?;
        for row in &invites {
            team.invites.push(TeamInvite {
                id: InviteId::new(row.get::<String, _>("id")),
                email: row.get("email"),
                created_at: row.get("created_at"),
            });
        }

        let methods = sqlx::query(
            "SELECT id, external_id, is_default, created_at FROM payment_methods \
             WHERE team_id = $1 ORDER BY created_at",
        )
        .bind(team.id.as_str())
        .fetch_all(&self.pool)
        .await?;
        for row in &methods {
            team.payment_methods.push(PaymentMethod {
                id: PaymentMethodId::new(row.get::<String, _>("id")),
                external_id: row.get("external_id"),
                is_default: row.get("is_default"),
                created_at: row.get("created_at"),
            });
        }

        Ok(team)
    }

    fn row_to_token(row: &PgRow) -> ApiToken {
        ApiToken {
            id: ApiTokenId::new(row.get::<String, _>("id")),
            team_id: TeamId::new(row.get::<String, _>("team_id")),
            creator_id: UserId::new(row.get::<String, _>("creator_id")),
            name: row.get("name"),
            scope: row.get("scope"),
            token: row.get("token"),
            last_used_at: row.get("last_used_at"),
            created_at: row.get("created_at"),
        }
    }

    fn row_to_server(row: &PgRow) -> StoreResult<Server> {
        Ok(Server {
            id: ServerId::new(row.get::<String, _>("id")),
            team_id: TeamId::new(row.get::<String, _>("team_id")),
            offering_id: OfferingId::new(row.get::<String, _>("offering_id")),
            location: row.get("location"),
            status: parse_with(row.get::<String, _>("status").as_str())?,
            provider_slug: row.get("provider_slug"),
            provider_id: row.get("provider_id"),
            public_ipv4: row.get("public_ipv4"),
            cell_id: row
                .get::<Option<String>, _>("cell_id")
                .map(CellId::new),
            billing: HourlyBillingState {
                last_event_sent_at: row.get("billing_last_event_sent_at"),
                event_name: row.get("billing_event_name"),
            },
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            deleted_at: row.get("deleted_at"),
        })
    }

    async fn cell_from_row(&self, row: &PgRow) -> StoreResult<Cell> {
        let id = CellId::new(row.get::<String, _>("id"));
        let talosconfig: Option<String> = row.get("talosconfig");
        let kubeconfig: Option<String> = row.get("kubeconfig");
        let archive: Option<Vec<u8>> = row.get("config_archive");
        let talos = match (talosconfig, kubeconfig, archive) {
            (Some(talosconfig), Some(kubeconfig), Some(config_archive)) => Some(TalosCellData {
                talosconfig,
                kubeconfig,
                config_archive,
            }),
            _ => None,
        };

        let servers = sqlx::query(
            "SELECT id FROM servers WHERE cell_id = $1 AND deleted_at IS NULL ORDER BY created_at",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|r| ServerId::new(r.get::<String, _>("id")))
        .collect();

        Ok(Cell {
            id,
            team_id: TeamId::new(row.get::<String, _>("team_id")),
            name: row.get("name"),
            cell_type: parse_with(row.get::<String, _>("cell_type").as_str())?,
            servers,
            talos,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_app(row: &PgRow) -> App {
        App {
            id: AppId::new(row.get::<String, _>("id")),
            team_id: TeamId::new(row.get::<String, _>("team_id")),
            creator_id: UserId::new(row.get::<String, _>("creator_id")),
            name: row.get("name"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_env(row: &PgRow) -> Env {
        Env {
            id: EnvId::new(row.get::<String, _>("id")),
            team_id: TeamId::new(row.get::<String, _>("team_id")),
            creator_id: UserId::new(row.get::<String, _>("creator_id")),
            name: row.get("name"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    fn row_to_app_settings(row: &PgRow) -> StoreResult<AppSettings> {
        let ports: Vec<PortSpec> = serde_json::from_value(row.get("ports"))
            .map_err(|e| StoreError::Corrupt(format!("app settings ports: {e}")))?;
        let external_ports: Vec<u16> = serde_json::from_value(row.get("external_ports"))
            .map_err(|e| StoreError::Corrupt(format!("app settings external ports: {e}")))?;
        let requests: ResourceSpec = serde_json::from_value(row.get("requests"))
            .map_err(|e| StoreError::Corrupt(format!("app settings requests: {e}")))?;
        let limits: ResourceSpec = serde_json::from_value(row.get("limits"))
            .map_err(|e| StoreError::Corrupt(format!("app settings limits: {e}")))?;
        Ok(AppSettings {
            id: AppSettingsId::new(row.get::<String, _>("id")),
            app_id: AppId::new(row.get::<String, _>("app_id")),
            image: row.get("image"),
            ports,
            external_ports,
            requests,
            limits,
            created_at: row.get("created_at"),
        })
    }

    fn row_to_app_env_vars(row: &PgRow) -> StoreResult<AppEnvVars> {
        let vars = serde_json::from_value(row.get("vars"))
            .map_err(|e| StoreError::Corrupt(format!("app env vars: {e}")))?;
        Ok(AppEnvVars {
            id: AppEnvVarsId::new(row.get::<String, _>("id")),
            app_id: AppId::new(row.get::<String, _>("app_id")),
            env_id: EnvId::new(row.get::<String, _>("env_id")),
            vars,
            created_at: row.get("created_at"),
        })
    }

    fn row_to_deployment(row: &PgRow) -> StoreResult<Deployment> {
        let cell_ids: Vec<String> = serde_json::from_value(row.get("cell_ids"))
            .map_err(|e| StoreError::Corrupt(format!("deployment cell ids: {e}")))?;
        Ok(Deployment {
            app_id: AppId::new(row.get::<String, _>("app_id")),
            env_id: EnvId::new(row.get::<String, _>("env_id")),
            seq: row.get("seq"),
            team_id: TeamId::new(row.get::<String, _>("team_id")),
            deploy_type: row.get("deploy_type"),
            app_settings_id: AppSettingsId::new(row.get::<String, _>("app_settings_id")),
            app_env_vars_id: AppEnvVarsId::new(row.get::<String, _>("app_env_vars_id")),
            cell_ids: cell_ids.into_iter().map(CellId::new).collect(),
            replicas: u32::try_from(row.get::<i32, _>("replicas")).unwrap_or(0),
            status: parse_with(row.get::<String, _>("status").as_str())?,
            status_reason: row.get("status_reason"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_build(row: &PgRow) -> StoreResult<Build> {
        let artifacts: Vec<ImageArtifact> = serde_json::from_value(row.get("artifacts"))
            .map_err(|e| StoreError::Corrupt(format!("build artifacts: {e}")))?;
        Ok(Build {
            id: BuildId::new(row.get::<String, _>("id")),
            team_id: TeamId::new(row.get::<String, _>("team_id")),
            creator_id: UserId::new(row.get::<String, _>("creator_id")),
            app_id: AppId::new(row.get::<String, _>("app_id")),
            status: parse_with(row.get::<String, _>("status").as_str())?,
            logs: row.get("logs"),
            artifacts,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn affected_or(result: sqlx::postgres::PgQueryResult, entity: Entity) -> StoreResult<()> {
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(entity));
        }
        Ok(())
    }
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS teams (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        billing_account_id TEXT,
        age_public_key TEXT NOT NULL,
        age_private_key TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS team_members (
        team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        PRIMARY KEY (team_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS team_invites (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        email TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payment_methods (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        external_id TEXT NOT NULL,
        is_default BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_payment_methods_one_default
    ON payment_methods (team_id) WHERE is_default
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS api_tokens (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL REFERENCES teams(id) ON DELETE CASCADE,
        creator_id TEXT NOT NULL,
        name TEXT NOT NULL,
        scope TEXT NOT NULL,
        token TEXT NOT NULL UNIQUE,
        last_used_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cells (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL,
        name TEXT NOT NULL,
        cell_type TEXT NOT NULL,
        talosconfig TEXT,
        kubeconfig TEXT,
        config_archive BYTEA,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS servers (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL,
        offering_id TEXT NOT NULL,
        location TEXT NOT NULL,
        status TEXT NOT NULL,
        provider_slug TEXT,
        provider_id TEXT,
        public_ipv4 TEXT,
        cell_id TEXT REFERENCES cells(id),
        billing_last_event_sent_at TIMESTAMPTZ,
        billing_event_name TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        deleted_at TIMESTAMPTZ,
        CHECK (provider_id IS NULL OR provider_slug IS NOT NULL)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_servers_team ON servers (team_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS apps (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL,
        creator_id TEXT NOT NULL,
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        UNIQUE (team_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS envs (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL,
        creator_id TEXT NOT NULL,
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        UNIQUE (team_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS app_settings (
        id TEXT PRIMARY KEY,
        app_id TEXT NOT NULL,
        image TEXT NOT NULL,
        ports JSONB NOT NULL,
        external_ports JSONB NOT NULL,
        requests JSONB NOT NULL,
        limits JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS app_env_vars (
        id TEXT PRIMARY KEY,
        app_id TEXT NOT NULL,
        env_id TEXT NOT NULL,
        vars JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS deployments (
        app_id TEXT NOT NULL,
        env_id TEXT NOT NULL,
        seq BIGINT NOT NULL,
        team_id TEXT NOT NULL,
        deploy_type TEXT NOT NULL,
        app_settings_id TEXT NOT NULL,
        app_env_vars_id TEXT NOT NULL,
        cell_ids JSONB NOT NULL,
        replicas INTEGER NOT NULL,
        status TEXT NOT NULL,
        status_reason TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (app_id, env_id, seq)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS builds (
        id TEXT PRIMARY KEY,
        team_id TEXT NOT NULL,
        creator_id TEXT NOT NULL,
        app_id TEXT NOT NULL,
        status TEXT NOT NULL,
        logs TEXT NOT NULL DEFAULT '',
        artifacts JSONB NOT NULL DEFAULT '[]',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

#[async_trait]
impl UserStore for PostgresStore {
    async fn create_user(&self, email: &str, pw: &str) -> StoreResult<User> {
        let hash = password::hash(pw)?;
        let now = Utc::now();
        let user = User {
            id: UserId::generate(),
            email: email.to_owned(),
            password_hash: hash,
            created_at: now,
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(user.id.as_str())
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(insert_error(Entity::User, email))?;
        Ok(user)
    }

    async fn user_by_email(&self, email: &str) -> StoreResult<User> {
        let row = sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_user(&r))
            .ok_or(StoreError::NotFound(Entity::User))
    }

    async fn user_by_id(&self, id: &UserId) -> StoreResult<User> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_user(&r))
            .ok_or(StoreError::NotFound(Entity::User))
    }
}

#[async_trait]
impl TeamStore for PostgresStore {
    async fn create_team(&self, name: &str, creator: &UserId) -> StoreResult<Team> {
        let now = Utc::now();
        let keypair = secrets::generate_age_keypair();
        let team_id = TeamId::generate();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO teams (id, name, age_public_key, age_private_key, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(team_id.as_str())
        .bind(name)
        .bind(&keypair.public_key)
        .bind(&keypair.private_key)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(insert_error(Entity::Team, name))?;

        sqlx::query("INSERT INTO team_members (team_id, user_id, role) VALUES ($1, $2, 'admin')")
            .bind(team_id.as_str())
            .bind(creator.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Team {
            id: team_id,
            name: name.to_owned(),
            billing_account_id: None,
            age_keypair: keypair,
            members: vec![TeamMember {
                user_id: creator.clone(),
                role: crate::types::TeamRole::Admin,
            }],
            invites: Vec::new(),
            payment_methods: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn team_by_id(&self, id: &TeamId) -> StoreResult<Team> {
        let row = sqlx::query("SELECT * FROM teams WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let team = row
            .map(|r| Self::row_to_team(&r))
            .ok_or(StoreError::NotFound(Entity::Team))?;
        self.preload_team(team).await
    }

    async fn teams_for_user(&self, user: &UserId) -> StoreResult<Vec<Team>> {
        let rows = sqlx::query(
            "SELECT t.* FROM teams t \
             INNER JOIN team_members m ON m.team_id = t.id \
             WHERE m.user_id = $1 ORDER BY t.created_at",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut teams = Vec::with_capacity(rows.len());
        for row in &rows {
            teams.push(self.preload_team(Self::row_to_team(row)).await?);
        }
        Ok(teams)
    }

    async fn add_member(
        &self,
        team: &TeamId,
        user: &UserId,
        role: crate::types::TeamRole,
    ) -> StoreResult<()> {
        sqlx::query("INSERT INTO team_members (team_id, user_id, role) VALUES ($1, $2, $3)")
            .bind(team.as_str())
            .bind(user.as_str())
            .bind(role.as_str())
            .execute(&self.pool)
            .await
            .map_err(insert_error(Entity::Team, user.as_str()))?;
        Ok(())
    }

    async fn remove_member(&self, team: &TeamId, user: &UserId) -> StoreResult<()> {
        let result =
            sqlx::query("DELETE FROM team_members WHERE team_id = $1 AND user_id = $2")
                .bind(team.as_str())
                .bind(user.as_str())
                .execute(&self.pool)
                .await?;
        Self::affected_or(result, Entity::User)
    }

    async fn create_invite(&self, team: &TeamId, email: &str) -> StoreResult<TeamInvite> {
        let invite = TeamInvite {
            id: InviteId::generate(),
            email: email.to_owned(),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO team_invites (id, team_id, email, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(invite.id.as_str())
        .bind(team.as_str())
        .bind(&invite.email)
        .bind(invite.created_at)
        .execute(&self.pool)
        .await?;
        Ok(invite)
    }

    async fn delete_invite(&self, team: &TeamId, invite: &InviteId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM team_invites WHERE team_id = $1 AND id = $2")
            .bind(team.as_str())
            .bind(invite.as_str())
            .execute(&self.pool)
            .await?;
        Self::affected_or(result, Entity::Invite)
    }

    async fn invites_for_email(&self, email: &str) -> StoreResult<Vec<(TeamId, TeamInvite)>> {
        let rows = sqlx::query(
            "SELECT team_id, id, email, created_at FROM team_invites WHERE email = $1",
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                (
                    TeamId::new(row.get::<String, _>("team_id")),
                    TeamInvite {
                        id: InviteId::new(row.get::<String, _>("id")),
                        email: row.get("email"),
                        created_at: row.get("created_at"),
                    },
                )
            })
            .collect())
    }

    async fn set_billing_account(&self, team: &TeamId, external_id: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE teams SET billing_account_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(external_id)
        .bind(team.as_str())
        .execute(&self.pool)
        .await?;
        Self::affected_or(result, Entity::Team)
    }

    async fn add_payment_method(
        &self,
        team: &TeamId,
        external_id: &str,
    ) -> StoreResult<PaymentMethod> {
        let mut tx = self.pool.begin().await?;
        let existing: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM payment_methods WHERE team_id = $1")
                .bind(team.as_str())
                .fetch_one(&mut *tx)
                .await?;

        let method = PaymentMethod {
            id: PaymentMethodId::generate(),
            external_id: external_id.to_owned(),
            is_default: existing == 0,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO payment_methods (id, team_id, external_id, is_default, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(method.id.as_str())
        .bind(team.as_str())
        .bind(&method.external_id)
        .bind(method.is_default)
        .bind(method.created_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(method)
    }

    async fn remove_payment_method(
        &self,
        team: &TeamId,
        id: &PaymentMethodId,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM payment_methods WHERE team_id = $1 AND id = $2")
            .bind(team.as_str())
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(Entity::PaymentMethod));
        }
        // Keep exactly one default while any method remains.
        sqlx::query(
            "UPDATE payment_methods SET is_default = TRUE \
             WHERE id = ( \
                 SELECT id FROM payment_methods WHERE team_id = $1 \
                 AND NOT EXISTS ( \
                     SELECT 1 FROM payment_methods WHERE team_id = $1 AND is_default \
                 ) \
                 ORDER BY created_at LIMIT 1 \
             )",
        )
        .bind(team.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl ApiTokenStore for PostgresStore {
    async fn create_token(
        &self,
        team: &TeamId,
        creator: &UserId,
        name: &str,
        scope: &str,
    ) -> StoreResult<ApiToken> {
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
        sqlx::query(
            "INSERT INTO api_tokens (id, team_id, creator_id, name, scope, token, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(token.id.as_str())
        .bind(token.team_id.as_str())
        .bind(token.creator_id.as_str())
        .bind(&token.name)
        .bind(&token.scope)
        .bind(&token.token)
        .bind(token.created_at)
        .execute(&self.pool)
        .await
        .map_err(insert_error(Entity::ApiToken, name))?;
        Ok(token)
    }

    async fn token_by_token(&self, token: &str) -> StoreResult<ApiToken> {
        let row = sqlx::query("SELECT * FROM api_tokens WHERE token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_token(&r))
            .ok_or(StoreError::NotFound(Entity::ApiToken))
    }

    async fn tokens_for_team(&self, team: &TeamId) -> StoreResult<Vec<ApiToken>> {
        let rows =
            sqlx::query("SELECT * FROM api_tokens WHERE team_id = $1 ORDER BY created_at")
                .bind(team.as_str())
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.iter().map(Self::row_to_token).collect())
    }

    async fn delete_token(&self, team: &TeamId, id: &ApiTokenId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE team_id = $1 AND id = $2")
            .bind(team.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Self::affected_or(result, Entity::ApiToken)
    }

    async fn touch_token_last_used(&self, id: &ApiTokenId, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE api_tokens SET last_used_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Self::affected_or(result, Entity::ApiToken)
    }
}

#[async_trait]
impl ServerStore for PostgresStore {
    async fn create_server(&self, server: &Server) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO servers (id, team_id, offering_id, location, status, provider_slug, \
             provider_id, public_ipv4, cell_id, billing_last_event_sent_at, billing_event_name, \
             created_at, updated_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(server.id.as_str())
        .bind(server.team_id.as_str())
        .bind(server.offering_id.as_str())
        .bind(&server.location)
        .bind(server.status.as_str())
        .bind(&server.provider_slug)
        .bind(&server.provider_id)
        .bind(&server.public_ipv4)
        .bind(server.cell_id.as_ref().map(CellId::as_str))
        .bind(server.billing.last_event_sent_at)
        .bind(&server.billing.event_name)
        .bind(server.created_at)
        .bind(server.updated_at)
        .bind(server.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(insert_error(Entity::Server, server.id.as_str()))?;
        Ok(())
    }

    async fn server_by_id(&self, id: &ServerId) -> StoreResult<Server> {
        let row = sqlx::query("SELECT * FROM servers WHERE id = $1 AND deleted_at IS NULL")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Self::row_to_server(&r),
            None => Err(StoreError::NotFound(Entity::Server)),
        }
    }

    async fn update_server_status(&self, id: &ServerId, status: ServerStatus) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE servers SET status = $1, updated_at = NOW(), \
             deleted_at = CASE WHEN $1 = 'destroyed' THEN NOW() ELSE deleted_at END \
             WHERE id = $2",
        )
        .bind(status.as_str())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Self::affected_or(result, Entity::Server)
    }

    async fn update_server_public_ipv4(&self, id: &ServerId, ipv4: &str) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE servers SET public_ipv4 = $1, updated_at = NOW() WHERE id = $2")
                .bind(ipv4)
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
        Self::affected_or(result, Entity::Server)
    }

    async fn update_server_provider_id(
        &self,
        id: &ServerId,
        provider_slug: &str,
        provider_id: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE servers SET provider_slug = $1, provider_id = $2, updated_at = NOW() \
             WHERE id = $3",
        )
        .bind(provider_slug)
        .bind(provider_id)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Self::affected_or(result, Entity::Server)
    }

    async fn servers_for_team(&self, team: &TeamId) -> StoreResult<Vec<Server>> {
        let rows = sqlx::query(
            "SELECT * FROM servers WHERE team_id = $1 AND deleted_at IS NULL ORDER BY created_at",
        )
        .bind(team.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_server).collect()
    }

    async fn update_server_billing_state(
        &self,
        id: &ServerId,
        billing: &HourlyBillingState,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE servers SET billing_last_event_sent_at = $1, billing_event_name = $2, \
             updated_at = NOW() WHERE id = $3",
        )
        .bind(billing.last_event_sent_at)
        .bind(&billing.event_name)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Self::affected_or(result, Entity::Server)
    }
}

#[async_trait]
impl CellStore for PostgresStore {
    async fn create_cell(&self, cell: &Cell) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO cells (id, team_id, name, cell_type, talosconfig, kubeconfig, \
             config_archive, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(cell.id.as_str())
        .bind(cell.team_id.as_str())
        .bind(&cell.name)
        .bind(cell.cell_type.as_str())
        .bind(cell.talos.as_ref().map(|t| t.talosconfig.as_str()))
        .bind(cell.talos.as_ref().map(|t| t.kubeconfig.as_str()))
        .bind(cell.talos.as_ref().map(|t| t.config_archive.as_slice()))
        .bind(cell.created_at)
        .bind(cell.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(insert_error(Entity::Cell, cell.id.as_str()))?;

        for server in &cell.servers {
            sqlx::query("UPDATE servers SET cell_id = $1, updated_at = NOW() WHERE id = $2")
                .bind(cell.id.as_str())
                .bind(server.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn cell_by_id(&self, id: &CellId) -> StoreResult<Cell> {
        let row = sqlx::query("SELECT * FROM cells WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => self.cell_from_row(&r).await,
            None => Err(StoreError::NotFound(Entity::Cell)),
        }
    }

    async fn cells_for_team(&self, team: &TeamId) -> StoreResult<Vec<Cell>> {
        let rows = sqlx::query("SELECT * FROM cells WHERE team_id = $1 ORDER BY created_at")
            .bind(team.as_str())
            .fetch_all(&self.pool)
            .await?;
        let mut cells = Vec::with_capacity(rows.len());
        for row in &rows {
            cells.push(self.cell_from_row(row).await?);
        }
        Ok(cells)
    }

    async fn update_cell_talos_data(&self, id: &CellId, data: &TalosCellData) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE cells SET talosconfig = $1, kubeconfig = $2, config_archive = $3, \
             updated_at = NOW() WHERE id = $4",
        )
        .bind(&data.talosconfig)
        .bind(&data.kubeconfig)
        .bind(data.config_archive.as_slice())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Self::affected_or(result, Entity::Cell)
    }

    async fn add_server_to_cell(&self, cell: &CellId, server: &ServerId) -> StoreResult<()> {
        let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cells WHERE id = $1")
            .bind(cell.as_str())
            .fetch_one(&self.pool)
            .await?;
        if exists == 0 {
            return Err(StoreError::NotFound(Entity::Cell));
        }
        let result =
            sqlx::query("UPDATE servers SET cell_id = $1, updated_at = NOW() WHERE id = $2")
                .bind(cell.as_str())
                .bind(server.as_str())
                .execute(&self.pool)
                .await?;
        Self::affected_or(result, Entity::Server)
    }
}

#[async_trait]
impl AppStore for PostgresStore {
    async fn create_app(&self, app: &App) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO apps (id, team_id, creator_id, name, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(app.id.as_str())
        .bind(app.team_id.as_str())
        .bind(app.creator_id.as_str())
        .bind(&app.name)
        .bind(app.created_at)
        .bind(app.updated_at)
        .execute(&self.pool)
        .await
        .map_err(insert_error(Entity::App, &app.name))?;
        Ok(())
    }

    async fn app_by_id(&self, id: &AppId) -> StoreResult<App> {
        let row = sqlx::query("SELECT * FROM apps WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_app(&r))
            .ok_or(StoreError::NotFound(Entity::App))
    }

    async fn apps_for_team(&self, team: &TeamId) -> StoreResult<Vec<App>> {
        let rows = sqlx::query("SELECT * FROM apps WHERE team_id = $1 ORDER BY created_at")
            .bind(team.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::row_to_app).collect())
    }

    async fn delete_app(&self, team: &TeamId, id: &AppId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM apps WHERE team_id = $1 AND id = $2")
            .bind(team.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Self::affected_or(result, Entity::App)
    }

    async fn create_env(&self, env: &Env) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO envs (id, team_id, creator_id, name, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(env.id.as_str())
        .bind(env.team_id.as_str())
        .bind(env.creator_id.as_str())
        .bind(&env.name)
        .bind(env.created_at)
        .bind(env.updated_at)
        .execute(&self.pool)
        .await
        .map_err(insert_error(Entity::Env, &env.name))?;
        Ok(())
    }

    async fn env_by_id(&self, id: &EnvId) -> StoreResult<Env> {
        let row = sqlx::query("SELECT * FROM envs WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_env(&r))
            .ok_or(StoreError::NotFound(Entity::Env))
    }

    async fn envs_for_team(&self, team: &TeamId) -> StoreResult<Vec<Env>> {
        let rows = sqlx::query("SELECT * FROM envs WHERE team_id = $1 ORDER BY created_at")
            .bind(team.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::row_to_env).collect())
    }

    async fn delete_env(&self, team: &TeamId, id: &EnvId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM envs WHERE team_id = $1 AND id = $2")
            .bind(team.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Self::affected_or(result, Entity::Env)
    }
}

#[async_trait]
impl SnapshotStore for PostgresStore {
    async fn create_app_settings(&self, settings: &AppSettings) -> StoreResult<()> {
        let ports = serde_json::to_value(&settings.ports)
            .map_err(|e| StoreError::internal(e.to_string()))?;
        let external_ports = serde_json::to_value(&settings.external_ports)
            .map_err(|e| StoreError::internal(e.to_string()))?;
        let requests = serde_json::to_value(&settings.requests)
            .map_err(|e| StoreError::internal(e.to_string()))?;
        let limits = serde_json::to_value(&settings.limits)
            .map_err(|e| StoreError::internal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO app_settings (id, app_id, image, ports, external_ports, requests, \
             limits, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(settings.id.as_str())
        .bind(settings.app_id.as_str())
        .bind(&settings.image)
        .bind(&ports)
        .bind(&external_ports)
        .bind(&requests)
        .bind(&limits)
        .bind(settings.created_at)
        .execute(&self.pool)
        .await
        .map_err(insert_error(Entity::AppSettings, settings.id.as_str()))?;
        Ok(())
    }

    async fn app_settings_by_id(&self, id: &AppSettingsId) -> StoreResult<AppSettings> {
        let row = sqlx::query("SELECT * FROM app_settings WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Self::row_to_app_settings(&r),
            None => Err(StoreError::NotFound(Entity::AppSettings)),
        }
    }

    async fn app_settings_for_app(&self, app: &AppId) -> StoreResult<Vec<AppSettings>> {
        let rows =
            sqlx::query("SELECT * FROM app_settings WHERE app_id = $1 ORDER BY created_at")
                .bind(app.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::row_to_app_settings).collect()
    }

    async fn create_app_env_vars(&self, vars: &AppEnvVars) -> StoreResult<()> {
        let value =
            serde_json::to_value(&vars.vars).map_err(|e| StoreError::internal(e.to_string()))?;
        sqlx::query(
            "INSERT INTO app_env_vars (id, app_id, env_id, vars, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(vars.id.as_str())
        .bind(vars.app_id.as_str())
        .bind(vars.env_id.as_str())
        .bind(&value)
        .bind(vars.created_at)
        .execute(&self.pool)
        .await
        .map_err(insert_error(Entity::AppEnvVars, vars.id.as_str()))?;
        Ok(())
    }

    async fn app_env_vars_by_id(&self, id: &AppEnvVarsId) -> StoreResult<AppEnvVars> {
        let row = sqlx::query("SELECT * FROM app_env_vars WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Self::row_to_app_env_vars(&r),
            None => Err(StoreError::NotFound(Entity::AppEnvVars)),
        }
    }

    async fn app_env_vars_for(&self, app: &AppId, env: &EnvId) -> StoreResult<Vec<AppEnvVars>> {
        let rows = sqlx::query(
            "SELECT * FROM app_env_vars WHERE app_id = $1 AND env_id = $2 ORDER BY created_at",
        )
        .bind(app.as_str())
        .bind(env.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_app_env_vars).collect()
    }
}

#[async_trait]
impl DeploymentStore for PostgresStore {
    async fn create_deployment(&self, deployment: &Deployment) -> StoreResult<Deployment> {
        let cell_ids = serde_json::to_value(
            deployment
                .cell_ids
                .iter()
                .map(CellId::as_str)
                .collect::<Vec<_>>(),
        )
        .map_err(|e| StoreError::internal(e.to_string()))?;

        let row = sqlx::query(
            "INSERT INTO deployments (app_id, env_id, seq, team_id, deploy_type, \
             app_settings_id, app_env_vars_id, cell_ids, replicas, status, status_reason, \
             created_at, updated_at) \
             SELECT $1, $2, COALESCE(MAX(seq), 0) + 1, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12 \
             FROM deployments WHERE app_id = $1 AND env_id = $2 \
             RETURNING seq",
        )
        .bind(deployment.app_id.as_str())
        .bind(deployment.env_id.as_str())
        .bind(deployment.team_id.as_str())
        .bind(&deployment.deploy_type)
        .bind(deployment.app_settings_id.as_str())
        .bind(deployment.app_env_vars_id.as_str())
        .bind(&cell_ids)
        .bind(i32::try_from(deployment.replicas).unwrap_or(i32::MAX))
        .bind(deployment.status.as_str())
        .bind(&deployment.status_reason)
        .bind(deployment.created_at)
        .bind(deployment.updated_at)
        .fetch_one(&self.pool)
        .await?;

        let mut stored = deployment.clone();
        stored.seq = row.get("seq");
        Ok(stored)
    }

    async fn deployment_by_key(
        &self,
        app: &AppId,
        env: &EnvId,
        seq: i64,
    ) -> StoreResult<Deployment> {
        let row = sqlx::query(
            "SELECT * FROM deployments WHERE app_id = $1 AND env_id = $2 AND seq = $3",
        )
        .bind(app.as_str())
        .bind(env.as_str())
        .bind(seq)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Self::row_to_deployment(&r),
            None => Err(StoreError::NotFound(Entity::Deployment)),
        }
    }

    async fn deployments_for(&self, app: &AppId, env: &EnvId) -> StoreResult<Vec<Deployment>> {
        let rows = sqlx::query(
            "SELECT * FROM deployments WHERE app_id = $1 AND env_id = $2 ORDER BY seq",
        )
        .bind(app.as_str())
        .bind(env.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_deployment).collect()
    }

    async fn update_deployment_status(
        &self,
        app: &AppId,
        env: &EnvId,
        seq: i64,
        status: DeploymentStatus,
        reason: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE deployments SET status = $1, status_reason = $2, updated_at = NOW() \
             WHERE app_id = $3 AND env_id = $4 AND seq = $5",
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(app.as_str())
        .bind(env.as_str())
        .bind(seq)
        .execute(&self.pool)
        .await?;
        Self::affected_or(result, Entity::Deployment)
    }
}

#[async_trait]
impl BuildStore for PostgresStore {
    async fn init_build(
        &self,
        team: &TeamId,
        creator: &UserId,
        app: &AppId,
    ) -> StoreResult<Build> {
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
        sqlx::query(
            "INSERT INTO builds (id, team_id, creator_id, app_id, status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(build.id.as_str())
        .bind(build.team_id.as_str())
        .bind(build.creator_id.as_str())
        .bind(build.app_id.as_str())
        .bind(build.status.as_str())
        .bind(build.created_at)
        .bind(build.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(build)
    }

    async fn build_by_id(&self, id: &BuildId) -> StoreResult<Build> {
        let row = sqlx::query("SELECT * FROM builds WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => Self::row_to_build(&r),
            None => Err(StoreError::NotFound(Entity::Build)),
        }
    }

    async fn update_build_status(&self, id: &BuildId, status: BuildStatus) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE builds SET status = $1, updated_at = NOW() WHERE id = $2")
                .bind(status.as_str())
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
        Self::affected_or(result, Entity::Build)
    }

    async fn update_build_logs(&self, id: &BuildId, logs: &str) -> StoreResult<()> {
        let result = sqlx::query("UPDATE builds SET logs = $1, updated_at = NOW() WHERE id = $2")
            .bind(logs)
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Self::affected_or(result, Entity::Build)
    }

    async fn update_build_artifacts(
        &self,
        id: &BuildId,
        artifacts: &[ImageArtifact],
    ) -> StoreResult<()> {
        let value =
            serde_json::to_value(artifacts).map_err(|e| StoreError::internal(e.to_string()))?;
        let result =
            sqlx::query("UPDATE builds SET artifacts = $1, updated_at = NOW() WHERE id = $2")
                .bind(&value)
                .bind(id.as_str())
                .execute(&self.pool)
                .await?;
        Self::affected_or(result, Entity::Build)
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}
