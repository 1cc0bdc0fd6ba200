//! The talos implementation of the cell provider interface.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use metal_core::{CellId, TypedId};
use metal_providers::{
    AdvanceResult, BuildImageRequest, CellProvider, CreateCellRequest, DnsProvider, LogEntry,
    LogOptions, ProviderError, ProviderResult, ServerStats,
};
use metal_store::{
    Cell, CellType, Deployment, DeploymentStatus, Store, TalosCellData,
};

use crate::cluster::{ClusterClient, ClusterConnector, Workload};
use crate::error::CellError;
use crate::provision::Provisioner;
use crate::reconcile::reconcile_addons;

fn to_provider_error(e: CellError) -> ProviderError {
    match e {
        CellError::Provider(inner) => inner,
        CellError::Config(msg) | CellError::Crypto(msg) => ProviderError::Rejected(msg),
        other => ProviderError::upstream(other.to_string()),
    }
}

/// Cell provider for `talos`-type cells.
pub struct TalosCellProvider {
    store: Arc<dyn Store>,
    dns: Arc<dyn DnsProvider>,
    connector: Arc<dyn ClusterConnector>,
    provisioner: Provisioner,
    dns_api_token: String,
}

impl TalosCellProvider {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        dns: Arc<dyn DnsProvider>,
        connector: Arc<dyn ClusterConnector>,
        provisioner: Provisioner,
        dns_api_token: String,
    ) -> Self {
        Self {
            store,
            dns,
            connector,
            provisioner,
            dns_api_token,
        }
    }

    async fn cluster_for(&self, cell_id: &CellId) -> ProviderResult<Arc<dyn ClusterClient>> {
        let cell = self
            .store
            .cell_by_id(cell_id)
            .await
            .map_err(|e| ProviderError::upstream(e.to_string()))?;
        let talos = cell
            .talos
            .ok_or_else(|| ProviderError::Rejected(format!("cell {cell_id} has no credentials")))?;
        self.connector
            .connect(&talos.kubeconfig)
            .await
            .map_err(to_provider_error)
    }

    /// Namespace an (app, env) pair deploys into.
    async fn deployment_namespace(&self, deployment: &Deployment) -> ProviderResult<String> {
        let app = self
            .store
            .app_by_id(&deployment.app_id)
            .await
            .map_err(|e| ProviderError::upstream(e.to_string()))?;
        let env = self
            .store
            .env_by_id(&deployment.env_id)
            .await
            .map_err(|e| ProviderError::upstream(e.to_string()))?;
        Ok(format!("app-{}-{}", app.name, env.name))
    }
}

#[async_trait]
impl CellProvider for TalosCellProvider {
    async fn create_cell(&self, request: &CreateCellRequest) -> ProviderResult<Cell> {
        let cell_id = CellId::generate();
        let data: TalosCellData = self
            .provisioner
            .provision(request, &cell_id)
            .await
            .map_err(to_provider_error)?;

        let now = Utc::now();
        let cell = Cell {
            id: cell_id,
            team_id: request.team_id.clone(),
            name: request.name.clone(),
            cell_type: CellType::Talos,
            servers: vec![request.first_server.id.clone()],
            talos: Some(data),
            created_at: now,
            updated_at: now,
        };
        self.store
            .create_cell(&cell)
            .await
            .map_err(|e| ProviderError::upstream(e.to_string()))?;

        info!(cell_id = %cell.id, team_id = %cell.team_id, "cell created");
        Ok(cell)
    }

    async fn server_stats(&self, cell_id: &CellId) -> ProviderResult<Vec<ServerStats>> {
        let cell = self
            .store
            .cell_by_id(cell_id)
            .await
            .map_err(|e| ProviderError::upstream(e.to_string()))?;
        let cluster = self.cluster_for(cell_id).await?;
        let usage = cluster.node_usage().await.map_err(to_provider_error)?;

        Ok(cell
            .servers
            .iter()
            .zip(usage)
            .map(|(server_id, usage)| ServerStats {
                server_id: server_id.clone(),
                cpu_usage_cores: usage.cpu_usage_cores,
                memory_usage_mib: usage.memory_usage_mib,
                disk_usage_gib: usage.disk_usage_gib,
            })
            .collect())
    }

    async fn advance_deployment(
        &self,
        cell_id: &CellId,
        deployment: &Deployment,
    ) -> ProviderResult<AdvanceResult> {
        let cluster = self.cluster_for(cell_id).await?;
        let namespace = self.deployment_namespace(deployment).await?;
        let settings = self
            .store
            .app_settings_by_id(&deployment.app_settings_id)
            .await
            .map_err(|e| ProviderError::upstream(e.to_string()))?;
        let env_vars = self
            .store
            .app_env_vars_by_id(&deployment.app_env_vars_id)
            .await
            .map_err(|e| ProviderError::upstream(e.to_string()))?;
        let app = self
            .store
            .app_by_id(&deployment.app_id)
            .await
            .map_err(|e| ProviderError::upstream(e.to_string()))?;

        cluster
            .apply_namespace(&crate::cluster::Namespace {
                name: namespace.clone(),
            })
            .await
            .map_err(to_provider_error)?;
        cluster
            .apply_workload(&Workload {
                namespace: namespace.clone(),
                name: app.name.clone(),
                image: settings.image.clone(),
                replicas: deployment.replicas,
                ports: settings.ports.iter().map(|p| p.port).collect(),
                env: env_vars.vars.clone(),
                annotations: BTreeMap::from([(
                    "metal.dev/deployment".to_owned(),
                    deployment.seq.to_string(),
                )]),
            })
            .await
            .map_err(to_provider_error)?;

        let state = cluster
            .workload_state(&namespace, &app.name)
            .await
            .map_err(to_provider_error)?;

        if let Some(failure) = state.failure {
            return Ok(AdvanceResult {
                status: DeploymentStatus::Failed,
                reason: failure,
            });
        }
        if state.is_ready() {
            Ok(AdvanceResult {
                status: DeploymentStatus::Running,
                reason: String::new(),
            })
        } else {
            Ok(AdvanceResult {
                status: DeploymentStatus::Deploying,
                reason: format!(
                    "{}/{} replicas ready",
                    state.ready_replicas, state.total_replicas
                ),
            })
        }
    }

    async fn deployment_logs(
        &self,
        cell_id: &CellId,
        deployment: &Deployment,
        opts: &LogOptions,
    ) -> ProviderResult<Vec<LogEntry>> {
        let cluster = self.cluster_for(cell_id).await?;
        let namespace = self.deployment_namespace(deployment).await?;
        let app = self
            .store
            .app_by_id(&deployment.app_id)
            .await
            .map_err(|e| ProviderError::upstream(e.to_string()))?;

        let lines = cluster
            .workload_logs(&namespace, &app.name, opts.since)
            .await
            .map_err(to_provider_error)?;
        Ok(lines
            .into_iter()
            .map(|(timestamp, line)| LogEntry { timestamp, line })
            .collect())
    }

    async fn build_image(
        &self,
        request: &BuildImageRequest,
    ) -> ProviderResult<metal_store::ImageArtifact> {
        let cluster = self.cluster_for(&request.cell_id).await?;
        let app = self
            .store
            .app_by_id(&request.app_id)
            .await
            .map_err(|e| ProviderError::upstream(e.to_string()))?;

        let reference = cluster
            .build_image(&app.name, request.build_id.as_str(), &request.build_dir)
            .await
            .map_err(to_provider_error)?;
        Ok(metal_store::ImageArtifact { reference })
    }

    async fn janitor(&self, cell_id: &CellId) -> ProviderResult<()> {
        let cluster = self.cluster_for(cell_id).await?;
        if let Err(e) = reconcile_addons(
            cluster.as_ref(),
            self.dns.as_ref(),
            &self.dns_api_token,
            cell_id.as_str(),
        )
        .await
        {
            warn!(cell_id = %cell_id, error = %e, "janitor reconciliation failed");
            return Err(to_provider_error(e));
        }
        Ok(())
    }
}

impl std::fmt::Debug for TalosCellProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TalosCellProvider").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{FakeClusterClient, FakeClusterConnector, NodeAddresses};
    use crate::maintenance::MockMaintenanceApi;
    use crate::provision::ProvisionerConfig;
    use metal_providers::MockDnsProvider;
    use metal_store::{test_fixtures, AppStore, CellStore, MemoryStore, ServerStore, SnapshotStore};
    use std::time::Duration;

    struct Harness {
        provider: TalosCellProvider,
        store: Arc<MemoryStore>,
        cluster: Arc<FakeClusterClient>,
    }

    async fn harness() -> Harness {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let secure_port = listener.local_addr().expect("addr").port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let store = Arc::new(MemoryStore::new());
        let cluster = Arc::new(FakeClusterClient::new());
        cluster.set_nodes(vec![NodeAddresses {
            external_ips: vec!["127.0.0.1".to_owned()],
            internal_ips: vec![],
        }]);
        let dns = Arc::new(MockDnsProvider::new("example.dev"));
        let connector = Arc::new(FakeClusterConnector::new(cluster.clone()));
        let provisioner = Provisioner::new(
            dns.clone(),
            Arc::new(MockMaintenanceApi::with_default_disks()),
            connector.clone(),
            ProvisionerConfig {
                dns_api_token: "dns-token".to_owned(),
                secure_port,
                port_poll_interval: Duration::from_millis(10),
                max_port_polls: 10,
                scratch_root: None,
            },
        );
        let provider = TalosCellProvider::new(
            store.clone(),
            dns,
            connector,
            provisioner,
            "dns-token".to_owned(),
        );
        Harness {
            provider,
            store,
            cluster,
        }
    }

    fn create_request(server: metal_store::Server) -> CreateCellRequest {
        use secrecy::ExposeSecret;
        let identity = age::x25519::Identity::generate();
        CreateCellRequest {
            name: "default".to_owned(),
            team_id: server.team_id.clone(),
            team_name: "acme".to_owned(),
            team_age_private_key: identity.to_string().expose_secret().clone(),
            dns_zone_id: "zone-1".to_owned(),
            first_server: server,
        }
    }

    #[tokio::test]
    async fn create_cell_persists_credentials() {
        let h = harness().await;
        let mut server = test_fixtures::server();
        server.public_ipv4 = Some("127.0.0.1".to_owned());
        h.store
            .create_server(&server)
            .await
            .expect("create server");

        let cell = h
            .provider
            .create_cell(&create_request(server.clone()))
            .await
            .expect("create cell");

        let stored = h.store.cell_by_id(&cell.id).await.expect("load cell");
        let talos = stored.talos.expect("talos data");
        assert!(!talos.talosconfig.is_empty());
        assert!(!talos.kubeconfig.is_empty());
        assert!(!talos.config_archive.is_empty());
        assert_eq!(stored.servers, vec![server.id]);
    }

    #[tokio::test]
    async fn advance_reports_deploying_then_running() {
        let h = harness().await;
        let mut server = test_fixtures::server();
        server.public_ipv4 = Some("127.0.0.1".to_owned());
        let cell = h
            .provider
            .create_cell(&create_request(server))
            .await
            .expect("create cell");

        let app = test_fixtures::app();
        h.store.create_app(&app).await.expect("app");
        let env = test_fixtures::env(&app.team_id);
        h.store.create_env(&env).await.expect("env");
        let settings = test_fixtures::app_settings(&app.id);
        h.store
            .create_app_settings(&settings)
            .await
            .expect("settings");
        let vars = test_fixtures::app_env_vars(&app.id, &env.id);
        h.store.create_app_env_vars(&vars).await.expect("vars");

        let mut deployment = test_fixtures::deployment();
        deployment.app_id = app.id.clone();
        deployment.env_id = env.id.clone();
        deployment.team_id = app.team_id.clone();
        deployment.app_settings_id = settings.id.clone();
        deployment.app_env_vars_id = vars.id.clone();
        deployment.cell_ids = vec![cell.id.clone()];

        let first = h
            .provider
            .advance_deployment(&cell.id, &deployment)
            .await
            .expect("advance");
        assert_eq!(first.status, DeploymentStatus::Deploying);

        let namespace = format!("app-{}-{}", app.name, env.name);
        h.cluster.set_workload_ready(&namespace, &app.name);

        let second = h
            .provider
            .advance_deployment(&cell.id, &deployment)
            .await
            .expect("advance");
        assert_eq!(second.status, DeploymentStatus::Running);
    }

    #[tokio::test]
    async fn janitor_reconciles_addons() {
        let h = harness().await;
        let mut server = test_fixtures::server();
        server.public_ipv4 = Some("127.0.0.1".to_owned());
        let cell = h
            .provider
            .create_cell(&create_request(server))
            .await
            .expect("create cell");

        h.provider.janitor(&cell.id).await.expect("janitor");
        assert!(h
            .cluster
            .resource("IPAddressPool", "metallb-system", "default")
            .is_some());
    }
}
