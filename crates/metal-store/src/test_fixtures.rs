//! Ready-made entity rows for tests.
//!
//! Mirrors how the provider mocks live beside the traits they fake: exported
//! from the crate so downstream handler tests can build store state without
//! repeating boilerplate.

use std::collections::BTreeMap;

use chrono::Utc;

use metal_core::{
    AppEnvVarsId, AppId, AppSettingsId, CellId, EnvId, OfferingId, ServerId, TeamId, TypedId,
    UserId,
};

use crate::types::{
    App, AppEnvVars, AppSettings, Cell, CellType, Deployment, DeploymentStatus, Env,
    HourlyBillingState, PortSpec, ResourceSpec, Server, ServerStatus,
};

/// A server in `pending-payment`, unattached to any cell.
#[must_use]
pub fn server() -> Server {
    let now = Utc::now();
    Server {
        id: ServerId::generate(),
        team_id: TeamId::generate(),
        offering_id: OfferingId::new("offering_ax102"),
        location: "HEL1".to_owned(),
        status: ServerStatus::PendingPayment,
        provider_slug: None,
        provider_id: None,
        public_ipv4: None,
        cell_id: None,
        billing: HourlyBillingState::default(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

/// A talos cell without credentials, holding the given servers.
#[must_use]
pub fn cell(team: &TeamId, servers: &[ServerId]) -> Cell {
    let now = Utc::now();
    Cell {
        id: CellId::generate(),
        team_id: team.clone(),
        name: "default".to_owned(),
        cell_type: CellType::Talos,
        servers: servers.to_vec(),
        talos: None,
        created_at: now,
        updated_at: now,
    }
}

/// An app owned by a fresh team.
#[must_use]
pub fn app() -> App {
    let now = Utc::now();
    App {
        id: AppId::generate(),
        team_id: TeamId::generate(),
        creator_id: UserId::generate(),
        name: format!("app-{}", &AppId::generate().as_str()[4..12]),
        created_at: now,
        updated_at: now,
    }
}

/// An env owned by the given team.
#[must_use]
pub fn env(team: &TeamId) -> Env {
    let now = Utc::now();
    Env {
        id: EnvId::generate(),
        team_id: team.clone(),
        creator_id: UserId::generate(),
        name: "dev".to_owned(),
        created_at: now,
        updated_at: now,
    }
}

/// An app-settings snapshot for a single HTTP port.
#[must_use]
pub fn app_settings(app: &AppId) -> AppSettings {
    AppSettings {
        id: AppSettingsId::generate(),
        app_id: app.clone(),
        image: "ghcr.io/example/web:latest".to_owned(),
        ports: vec![PortSpec {
            name: "http".to_owned(),
            port: 8080,
            proto: "TCP".to_owned(),
        }],
        external_ports: vec![443],
        requests: ResourceSpec {
            cpu_cores: 0.5,
            memory_mib: 256,
        },
        limits: ResourceSpec {
            cpu_cores: 1.0,
            memory_mib: 512,
        },
        created_at: Utc::now(),
    }
}

/// An env-vars snapshot for (app, env).
#[must_use]
pub fn app_env_vars(app: &AppId, env: &EnvId) -> AppEnvVars {
    AppEnvVars {
        id: AppEnvVarsId::generate(),
        app_id: app.clone(),
        env_id: env.clone(),
        vars: BTreeMap::from([("LOG_LEVEL".to_owned(), "info".to_owned())]),
        created_at: Utc::now(),
    }
}

/// A pending deployment targeting one cell.
#[must_use]
pub fn deployment() -> Deployment {
    let now = Utc::now();
    let app_id = AppId::generate();
    let env_id = EnvId::generate();
    Deployment {
        app_id: app_id.clone(),
        env_id,
        seq: 0,
        team_id: TeamId::generate(),
        deploy_type: "deploy".to_owned(),
        app_settings_id: AppSettingsId::generate(),
        app_env_vars_id: AppEnvVarsId::generate(),
        cell_ids: vec![CellId::generate()],
        replicas: 1,
        status: DeploymentStatus::Pending,
        status_reason: String::new(),
        created_at: now,
        updated_at: now,
    }
}
