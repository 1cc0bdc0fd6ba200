//! The one-shot cell provisioning sequence.
//!
//! Materializes a working one-node cluster from a freshly installed node in
//! maintenance mode. Every step is idempotent; the calling loop retries the
//! whole sequence on transient failure, and nothing durable is written
//! until the very end.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use metal_core::TypedId;
use metal_providers::{CreateCellRequest, DnsProvider};
use metal_store::TalosCellData;

use crate::cluster::ClusterConnector;
use crate::error::{CellError, CellResult};
use crate::maintenance::MaintenanceApi;
use crate::names::server_host;
use crate::reconcile::reconcile_addons;
use crate::secrets::ClusterSecrets;
use crate::talosconfig::{ClusterSpec, NodeSpec};
use crate::{archive, sops};

/// Settings for the provisioning sequence.
#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    /// API token handed to cert-manager and external-dns inside the cell.
    pub dns_api_token: String,
    /// The node's secure API port, polled for reachability after apply.
    pub secure_port: u16,
    /// Interval between reachability probes.
    pub port_poll_interval: Duration,
    /// Probe attempts before giving up.
    pub max_port_polls: u32,
    /// Root for scratch directories; `None` uses the system temp dir.
    pub scratch_root: Option<std::path::PathBuf>,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            dns_api_token: String::new(),
            secure_port: 50000,
            port_poll_interval: Duration::from_secs(5),
            max_port_polls: 60,
            scratch_root: None,
        }
    }
}

/// Provisions talos cells.
pub struct Provisioner {
    dns: Arc<dyn DnsProvider>,
    maintenance: Arc<dyn MaintenanceApi>,
    connector: Arc<dyn ClusterConnector>,
    config: ProvisionerConfig,
}

impl Provisioner {
    #[must_use]
    pub fn new(
        dns: Arc<dyn DnsProvider>,
        maintenance: Arc<dyn MaintenanceApi>,
        connector: Arc<dyn ClusterConnector>,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            dns,
            maintenance,
            connector,
            config,
        }
    }

    /// Run the full provisioning sequence for a new cell and return its
    /// credentials. The caller persists the cell row; no partial state is
    /// written here.
    pub async fn provision(
        &self,
        request: &CreateCellRequest,
        cell_id: &metal_core::CellId,
    ) -> CellResult<TalosCellData> {
        let server = &request.first_server;
        let ipv4 = server
            .public_ipv4
            .as_deref()
            .ok_or_else(|| CellError::config("first server has no public ipv4"))?;
        let apex = self.dns.domain().to_owned();
        let host = server_host(server.id.as_str(), &apex);

        info!(
            cell_id = %cell_id,
            server_id = %server.id,
            host = %host,
            "provisioning cell"
        );

        // 1. DNS record for the control-plane endpoint.
        self.dns
            .find_or_create_a_record(&request.dns_zone_id, &host, ipv4)
            .await?;

        // 2. Disk discovery over the maintenance API.
        let disks = self.maintenance.disks(ipv4).await?;
        let system_disk = disks
            .iter()
            .find(|d| d.system_disk)
            .ok_or_else(|| CellError::config("node reports no system disk"))?
            .device
            .clone();
        debug!(disk = %system_disk, "selected system disk");

        // 3. Cluster config generation.
        let cluster_name = cell_id.as_str().replace('_', "-");
        let endpoint = format!("https://{host}:6443");
        let node = NodeSpec {
            hostname: host.clone(),
            ip_address: ipv4.to_owned(),
            control_plane: true,
            install_disk: system_disk,
            node_labels: vec![
                ("metal.dev/server".to_owned(), server.id.as_str().to_owned()),
                ("metal.dev/cell".to_owned(), cell_id.as_str().to_owned()),
                ("metal.dev/name".to_owned(), request.name.clone()),
            ],
        };
        let spec = ClusterSpec::single_node(&cluster_name, &endpoint, node);

        // 4. Secrets bundle, encrypted to the team's age recipient. The
        // identity arrives as an explicit parameter; its public half is
        // derived here.
        let identity: age::x25519::Identity = request
            .team_age_private_key
            .parse()
            .map_err(|e| CellError::crypto(format!("invalid team age key: {e}")))?;
        let recipient = identity.to_public().to_string();
        let secrets = ClusterSecrets::generate(&cluster_name);
        let secrets_envelope = sops::encrypt_yaml(&secrets.to_yaml()?, &recipient)?;

        // 5. Render everything into a scratch working tree.
        let scratch = match &self.config.scratch_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                tempfile::tempdir_in(root)?
            }
            None => tempfile::tempdir()?,
        };
        let dir = scratch.path();
        let machine_config = spec.render_machine_config(&spec.nodes[0], &secrets)?;
        let talosconfig = spec.render_talosconfig(&secrets)?;
        let kubeconfig = spec.render_kubeconfig(&secrets)?;

        fs::write(dir.join("talconfig.yaml"), spec.to_yaml()?)?;
        fs::write(dir.join("talsecret.sops.yaml"), &secrets_envelope)?;
        fs::write(dir.join(".gitignore"), "clusterconfig/\n")?;
        fs::create_dir_all(dir.join("clusterconfig"))?;
        fs::write(
            dir.join("clusterconfig").join(format!("{host}.yaml")),
            &machine_config,
        )?;
        fs::write(dir.join("clusterconfig").join("talosconfig"), &talosconfig)?;
        fs::write(dir.join("clusterconfig").join("kubeconfig"), &kubeconfig)?;

        // 6. Push the control-plane config to the maintenance API.
        self.maintenance.apply_config(ipv4, &machine_config).await?;

        // 7. Wait for the secure endpoint.
        self.wait_for_secure_port(ipv4).await?;

        // 8. Bootstrap over the new credentials.
        self.maintenance.bootstrap(ipv4, &talosconfig).await?;

        // 9. Commit the working tree and archive it.
        let config_archive = archive::commit_and_archive(dir)?;

        // 10. In-cluster add-on reconciliation.
        let cluster = self.connector.connect(&kubeconfig).await?;
        reconcile_addons(
            cluster.as_ref(),
            self.dns.as_ref(),
            &self.config.dns_api_token,
            cell_id.as_str(),
        )
        .await?;

        info!(cell_id = %cell_id, "cell provisioned");

        Ok(TalosCellData {
            talosconfig,
            kubeconfig,
            config_archive,
        })
    }

    async fn wait_for_secure_port(&self, ip: &str) -> CellResult<()> {
        let addr = format!("{ip}:{}", self.config.secure_port);
        for attempt in 0..self.config.max_port_polls {
            match tokio::net::TcpStream::connect(&addr).await {
                Ok(_) => {
                    debug!(addr = %addr, attempt, "secure port reachable");
                    return Ok(());
                }
                Err(e) => {
                    debug!(addr = %addr, attempt, error = %e, "secure port not yet reachable");
                    tokio::time::sleep(self.config.port_poll_interval).await;
                }
            }
        }
        Err(CellError::Timeout(format!("secure port at {addr}")))
    }
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
