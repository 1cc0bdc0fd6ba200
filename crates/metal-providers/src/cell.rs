//! Cell provider interface.
//!
//! A cell provider knows how to materialize and operate one kind of cluster.
//! The registry routes by [`CellType`]; `talos` is the only wired variant.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use metal_core::{AppId, BuildId, CellId, ServerId, TeamId, TypedId};
use metal_store::{Cell, CellType, Deployment, DeploymentStatus, ImageArtifact, Server};

use crate::error::{ProviderError, ProviderResult};

/// Request to create a new cell around a freshly installed node.
#[derive(Debug, Clone)]
pub struct CreateCellRequest {
    pub name: String,
    pub team_id: TeamId,
    pub team_name: String,
    /// The team's age identity, for encrypting the cluster secrets bundle.
    pub team_age_private_key: String,
    pub dns_zone_id: String,
    pub first_server: Server,
}

/// Point-in-time resource usage of one cell member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStats {
    pub server_id: ServerId,
    pub cpu_usage_cores: f64,
    pub memory_usage_mib: u64,
    pub disk_usage_gib: u64,
}

/// Result of advancing a deployment one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceResult {
    pub status: DeploymentStatus,
    pub reason: String,
}

/// One line of deployment log output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

/// Options for fetching deployment logs.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Only return entries after this instant.
    pub since: Option<DateTime<Utc>>,
}

/// Request to build a container image inside a cell.
#[derive(Debug)]
pub struct BuildImageRequest {
    pub cell_id: CellId,
    pub app_id: AppId,
    pub build_id: BuildId,
    /// Directory holding the unpacked application source.
    pub build_dir: std::path::PathBuf,
}

/// Operations on one kind of cell.
#[async_trait]
pub trait CellProvider: Send + Sync {
    /// Materialize a working cluster from the first server and return the
    /// persisted cell. No partial cell rows are written on failure.
    async fn create_cell(&self, request: &CreateCellRequest) -> ProviderResult<Cell>;

    /// Resource usage of each member server.
    async fn server_stats(&self, cell_id: &CellId) -> ProviderResult<Vec<ServerStats>>;

    /// Drive a deployment one step forward inside the cell.
    async fn advance_deployment(
        &self,
        cell_id: &CellId,
        deployment: &Deployment,
    ) -> ProviderResult<AdvanceResult>;

    /// Fetch logs for a deployment's workload.
    async fn deployment_logs(
        &self,
        cell_id: &CellId,
        deployment: &Deployment,
        opts: &LogOptions,
    ) -> ProviderResult<Vec<LogEntry>>;

    /// Build an image from unpacked source inside the cell, returning the
    /// pushed artifact.
    async fn build_image(&self, request: &BuildImageRequest) -> ProviderResult<ImageArtifact>;

    /// Periodic health and reconciliation pass over the cell.
    async fn janitor(&self, cell_id: &CellId) -> ProviderResult<()>;
}

/// Routes cell operations to the provider for the cell's type.
pub struct CellProviderRegistry {
    providers: HashMap<CellType, std::sync::Arc<dyn CellProvider>>,
}

impl CellProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Register the provider for a cell type, replacing any previous one.
    #[must_use]
    pub fn with(mut self, cell_type: CellType, provider: std::sync::Arc<dyn CellProvider>) -> Self {
        self.providers.insert(cell_type, provider);
        self
    }

    /// Resolve the provider for a cell type.
    pub fn for_type(&self, cell_type: CellType) -> ProviderResult<&dyn CellProvider> {
        self.providers
            .get(&cell_type)
            .map(std::sync::Arc::as_ref)
            .ok_or_else(|| {
                ProviderError::Rejected(format!("no provider for cell type {cell_type}"))
            })
    }
}

impl Default for CellProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CellProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellProviderRegistry")
            .field("types", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Mock cell provider with scripted advance results.
#[derive(Debug, Default)]
pub struct MockCellProvider {
    advances: Mutex<std::collections::VecDeque<AdvanceResult>>,
    advance_calls: Mutex<u32>,
    janitor_calls: Mutex<u32>,
    created: Mutex<Vec<String>>,
}

impl MockCellProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the sequence of results `advance_deployment` will return.
    pub fn script_advances(&self, results: impl IntoIterator<Item = AdvanceResult>) {
        self.advances.lock().expect("lock poisoned").extend(results);
    }

    /// How many times `advance_deployment` was called.
    #[must_use]
    pub fn advance_calls(&self) -> u32 {
        *self.advance_calls.lock().expect("lock poisoned")
    }

    /// How many times `janitor` was called.
    #[must_use]
    pub fn janitor_calls(&self) -> u32 {
        *self.janitor_calls.lock().expect("lock poisoned")
    }

    /// Names of cells created through this mock.
    #[must_use]
    pub fn created_cells(&self) -> Vec<String> {
        self.created.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl CellProvider for MockCellProvider {
    async fn create_cell(&self, request: &CreateCellRequest) -> ProviderResult<Cell> {
        self.created
            .lock()
            .expect("lock poisoned")
            .push(request.name.clone());
        let now = Utc::now();
        Ok(Cell {
            id: CellId::generate(),
            team_id: request.team_id.clone(),
            name: request.name.clone(),
            cell_type: CellType::Talos,
            servers: vec![request.first_server.id.clone()],
            talos: Some(metal_store::TalosCellData {
                talosconfig: "context: mock".to_owned(),
                kubeconfig: "apiVersion: v1".to_owned(),
                config_archive: vec![0x1f, 0x8b],
            }),
            created_at: now,
            updated_at: now,
        })
    }

    async fn server_stats(&self, _cell_id: &CellId) -> ProviderResult<Vec<ServerStats>> {
        Ok(Vec::new())
    }

    async fn advance_deployment(
        &self,
        _cell_id: &CellId,
        _deployment: &Deployment,
    ) -> ProviderResult<AdvanceResult> {
        *self.advance_calls.lock().expect("lock poisoned") += 1;
        self.advances
            .lock()
            .expect("lock poisoned")
            .pop_front()
            .ok_or_else(|| ProviderError::upstream("no scripted advance result"))
    }

    async fn deployment_logs(
        &self,
        _cell_id: &CellId,
        _deployment: &Deployment,
        _opts: &LogOptions,
    ) -> ProviderResult<Vec<LogEntry>> {
        Ok(Vec::new())
    }

    async fn build_image(&self, request: &BuildImageRequest) -> ProviderResult<ImageArtifact> {
        Ok(ImageArtifact {
            reference: format!("registry.mock/{}:{}", request.app_id, request.build_id),
        })
    }

    async fn janitor(&self, _cell_id: &CellId) -> ProviderResult<()> {
        *self.janitor_calls.lock().expect("lock poisoned") += 1;
        Ok(())
    }
}
