//! Maintenance-mode API of a freshly installed node.
//!
//! Before the cluster has issued its own CA the node only speaks TLS with a
//! self-signed certificate, so the HTTP client deliberately skips
//! verification. Once the machine config is applied the node closes this
//! surface and the secure port takes over.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CellError, CellResult};

/// A disk as reported by the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Disk {
    pub device: String,
    pub size_bytes: u64,
    /// Whether the OS installed itself onto this disk.
    pub system_disk: bool,
}

/// The pre-cluster API surface exposed by a node in maintenance mode.
#[async_trait]
pub trait MaintenanceApi: Send + Sync {
    /// Enumerate the node's disks.
    async fn disks(&self, node_ip: &str) -> CellResult<Vec<Disk>>;

    /// Push a machine config to the node. The node applies it and reboots
    /// out of maintenance mode.
    async fn apply_config(&self, node_ip: &str, machine_config: &str) -> CellResult<()>;

    /// Issue the bootstrap RPC over the node's secure port using the given
    /// client credentials.
    async fn bootstrap(&self, node_ip: &str, talosconfig: &str) -> CellResult<()>;
}

/// HTTPS implementation of the maintenance API.
pub struct HttpMaintenanceApi {
    client: reqwest::Client,
    port: u16,
}

impl HttpMaintenanceApi {
    /// Build a client for maintenance endpoints. `timeout` bounds each call.
    pub fn new(timeout: Duration) -> CellResult<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()
            .map_err(|e| CellError::cluster(format!("failed to build client: {e}")))?;
        Ok(Self { client, port: 50000 })
    }

    fn url(&self, node_ip: &str, path: &str) -> String {
        format!("https://{node_ip}:{}{path}", self.port)
    }
}

#[async_trait]
impl MaintenanceApi for HttpMaintenanceApi {
    async fn disks(&self, node_ip: &str) -> CellResult<Vec<Disk>> {
        let response = self
            .client
            .get(self.url(node_ip, "/machine/disks"))
            .send()
            .await
            .map_err(|e| CellError::cluster(format!("disks request failed: {e}")))?
            .error_for_status()
            .map_err(|e| CellError::cluster(format!("disks request rejected: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| CellError::cluster(format!("disks response undecodable: {e}")))
    }

    async fn apply_config(&self, node_ip: &str, machine_config: &str) -> CellResult<()> {
        self.client
            .post(self.url(node_ip, "/machine/config"))
            .header("content-type", "application/yaml")
            .body(machine_config.to_owned())
            .send()
            .await
            .map_err(|e| CellError::cluster(format!("apply config failed: {e}")))?
            .error_for_status()
            .map_err(|e| CellError::cluster(format!("apply config rejected: {e}")))?;
        Ok(())
    }

    async fn bootstrap(&self, node_ip: &str, talosconfig: &str) -> CellResult<()> {
        self.client
            .post(self.url(node_ip, "/machine/bootstrap"))
            .header("content-type", "application/yaml")
            .body(talosconfig.to_owned())
            .send()
            .await
            .map_err(|e| CellError::cluster(format!("bootstrap failed: {e}")))?
            .error_for_status()
            .map_err(|e| CellError::cluster(format!("bootstrap rejected: {e}")))?;
        Ok(())
    }
}

impl std::fmt::Debug for HttpMaintenanceApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMaintenanceApi")
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Scripted maintenance API for tests.
#[derive(Debug, Default)]
pub struct MockMaintenanceApi {
    disks: Mutex<Vec<Disk>>,
    applied: Mutex<Vec<String>>,
    bootstrapped: Mutex<Vec<String>>,
}

impl MockMaintenanceApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A node with one NVMe system disk and one spare.
    #[must_use]
    pub fn with_default_disks() -> Self {
        let api = Self::new();
        api.script_disks(vec![
            Disk {
                device: "/dev/nvme0n1".to_owned(),
                size_bytes: 512 * 1024 * 1024 * 1024,
                system_disk: true,
            },
            Disk {
                device: "/dev/sda".to_owned(),
                size_bytes: 2 * 1024 * 1024 * 1024 * 1024,
                system_disk: false,
            },
        ]);
        api
    }

    pub fn script_disks(&self, disks: Vec<Disk>) {
        *self.disks.lock().expect("lock poisoned") = disks;
    }

    /// Machine configs applied so far.
    #[must_use]
    pub fn applied_configs(&self) -> Vec<String> {
        self.applied.lock().expect("lock poisoned").clone()
    }

    /// Node IPs bootstrapped so far.
    #[must_use]
    pub fn bootstrapped_nodes(&self) -> Vec<String> {
        self.bootstrapped.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl MaintenanceApi for MockMaintenanceApi {
    async fn disks(&self, _node_ip: &str) -> CellResult<Vec<Disk>> {
        Ok(self.disks.lock().expect("lock poisoned").clone())
    }

    async fn apply_config(&self, _node_ip: &str, machine_config: &str) -> CellResult<()> {
        self.applied
            .lock()
            .expect("lock poisoned")
            .push(machine_config.to_owned());
        Ok(())
    }

    async fn bootstrap(&self, node_ip: &str, _talosconfig: &str) -> CellResult<()> {
        self.bootstrapped
            .lock()
            .expect("lock poisoned")
            .push(node_ip.to_owned());
        Ok(())
    }
}
