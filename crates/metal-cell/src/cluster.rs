//! In-cluster resource operations.
//!
//! Everything the provisioner does inside a cell goes through
//! [`ClusterClient`]: typed resources with create-or-update semantics. On
//! update a resource's spec and annotations are replaced wholesale;
//! secrets replace only their data. Applying the same resource twice leaves
//! the cluster exactly as applying it once.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CellError, CellResult};

/// A namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
}

/// An opaque or typed secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    pub secret_type: String,
    pub data: BTreeMap<String, Vec<u8>>,
}

/// A load-balancer address pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressPool {
    pub namespace: String,
    pub name: String,
    /// CIDR blocks, one `/32` per node address.
    pub addresses: Vec<String>,
}

/// An L2 advertisement over one or more pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2Advertisement {
    pub namespace: String,
    pub name: String,
    pub pools: Vec<String>,
}

/// An ACME cluster issuer solving DNS01 through the DNS provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIssuer {
    pub name: String,
    pub acme_server: String,
    pub email: String,
    /// (secret name, key) holding the DNS provider token.
    pub token_secret: (String, String),
}

/// A certificate request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub namespace: String,
    pub name: String,
    pub secret_name: String,
    pub dns_names: Vec<String>,
    pub issuer: String,
}

/// One gateway listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayListener {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    pub hostname: String,
    /// Secret terminating TLS, for HTTPS listeners.
    pub tls_secret: Option<String>,
}

/// A gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub namespace: String,
    pub name: String,
    pub listeners: Vec<GatewayListener>,
    pub annotations: BTreeMap<String, String>,
}

/// An HTTP route from a hostname to a backend service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRoute {
    pub namespace: String,
    pub name: String,
    pub hostnames: Vec<String>,
    pub backend_service: String,
    pub backend_port: u16,
}

/// A persistent volume claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentVolumeClaim {
    pub namespace: String,
    pub name: String,
    pub storage_class: String,
    pub access_mode: String,
    pub size_gib: u64,
}

/// A user workload (one app in one env).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    pub image: String,
    pub replicas: u32,
    pub ports: Vec<u16>,
    pub env: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Observed state of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadState {
    pub ready_replicas: u32,
    pub total_replicas: u32,
    /// Set when the workload can never become ready.
    pub failure: Option<String>,
}

impl WorkloadState {
    /// Whether every replica is serving.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready_replicas >= self.total_replicas && self.failure.is_none()
    }
}

/// Addresses of one cluster node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddresses {
    pub external_ips: Vec<String>,
    pub internal_ips: Vec<String>,
}

/// Point-in-time resource usage of one cluster node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUsage {
    pub cpu_usage_cores: f64,
    pub memory_usage_mib: u64,
    pub disk_usage_gib: u64,
}

/// Marker for anything the client can apply, used by the fake to key its
/// store.
pub trait ClusterResource: Serialize {
    /// Resource kind, for keying.
    const KIND: &'static str;

    /// Namespace the resource lives in; empty for cluster-scoped kinds.
    fn namespace(&self) -> &str;

    /// Resource name.
    fn name(&self) -> &str;
}

macro_rules! cluster_resource {
    ($type:ident, $kind:literal, cluster_scoped) => {
        impl ClusterResource for $type {
            const KIND: &'static str = $kind;
            fn namespace(&self) -> &str {
                ""
            }
            fn name(&self) -> &str {
                &self.name
            }
        }
    };
    ($type:ident, $kind:literal) => {
        impl ClusterResource for $type {
            const KIND: &'static str = $kind;
            fn namespace(&self) -> &str {
                &self.namespace
            }
            fn name(&self) -> &str {
                &self.name
            }
        }
    };
}

cluster_resource!(Namespace, "Namespace", cluster_scoped);
cluster_resource!(Secret, "Secret");
cluster_resource!(IpAddressPool, "IPAddressPool");
cluster_resource!(L2Advertisement, "L2Advertisement");
cluster_resource!(ClusterIssuer, "ClusterIssuer", cluster_scoped);
cluster_resource!(Certificate, "Certificate");
cluster_resource!(Gateway, "Gateway");
cluster_resource!(HttpRoute, "HTTPRoute");
cluster_resource!(PersistentVolumeClaim, "PersistentVolumeClaim");
cluster_resource!(Workload, "Workload");

/// Operations against one cell's cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Addresses of every node in the cluster.
    async fn nodes(&self) -> CellResult<Vec<NodeAddresses>>;

    async fn apply_namespace(&self, resource: &Namespace) -> CellResult<()>;
    async fn apply_secret(&self, resource: &Secret) -> CellResult<()>;
    async fn apply_ip_address_pool(&self, resource: &IpAddressPool) -> CellResult<()>;
    async fn apply_l2_advertisement(&self, resource: &L2Advertisement) -> CellResult<()>;
    async fn apply_cluster_issuer(&self, resource: &ClusterIssuer) -> CellResult<()>;
    async fn apply_certificate(&self, resource: &Certificate) -> CellResult<()>;
    async fn apply_gateway(&self, resource: &Gateway) -> CellResult<()>;
    async fn apply_http_route(&self, resource: &HttpRoute) -> CellResult<()>;
    async fn apply_pvc(&self, resource: &PersistentVolumeClaim) -> CellResult<()>;
    async fn apply_workload(&self, resource: &Workload) -> CellResult<()>;

    /// Fetch an existing secret, if present. Used to keep generated
    /// credentials stable across reconciliations.
    async fn get_secret(&self, namespace: &str, name: &str) -> CellResult<Option<Secret>>;

    /// Block until the certificate reports `Ready=True`, polling every 5 s
    /// up to `timeout`.
    async fn wait_certificate_ready(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> CellResult<()>;

    /// Observed state of a workload.
    async fn workload_state(&self, namespace: &str, name: &str) -> CellResult<WorkloadState>;

    /// Log lines emitted by a workload, optionally only after `since`.
    async fn workload_logs(
        &self,
        namespace: &str,
        name: &str,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> CellResult<Vec<(chrono::DateTime<chrono::Utc>, String)>>;

    /// Resource usage per node, in cluster node order.
    async fn node_usage(&self) -> CellResult<Vec<NodeUsage>>;

    /// Build a container image from an unpacked source directory inside the
    /// cell, returning the pushed reference.
    async fn build_image(
        &self,
        app: &str,
        tag: &str,
        context_dir: &std::path::Path,
    ) -> CellResult<String>;

    /// Install a platform package (registry, external-dns, …) with the
    /// given values.
    async fn install_package(
        &self,
        name: &str,
        namespace: &str,
        values: serde_json::Value,
    ) -> CellResult<()>;
}

/// Opens cluster clients from a kubeconfig.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, kubeconfig: &str) -> CellResult<Arc<dyn ClusterClient>>;
}

type ResourceKey = (String, String, String);

/// In-memory cluster for tests.
#[derive(Debug, Default)]
pub struct FakeClusterClient {
    resources: Mutex<HashMap<ResourceKey, serde_json::Value>>,
    nodes: Mutex<Vec<NodeAddresses>>,
    packages: Mutex<Vec<(String, String)>>,
    ready_workloads: Mutex<Vec<(String, String)>>,
    certificates_ready: bool,
}

impl FakeClusterClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            certificates_ready: true,
            ..Self::default()
        }
    }

    /// Configure the node list the fake reports.
    pub fn set_nodes(&self, nodes: Vec<NodeAddresses>) {
        *self.nodes.lock().expect("lock poisoned") = nodes;
    }

    /// Mark a workload as fully ready.
    pub fn set_workload_ready(&self, namespace: &str, name: &str) {
        self.ready_workloads
            .lock()
            .expect("lock poisoned")
            .push((namespace.to_owned(), name.to_owned()));
    }

    /// Fetch a stored resource for assertions.
    #[must_use]
    pub fn resource(&self, kind: &str, namespace: &str, name: &str) -> Option<serde_json::Value> {
        self.resources
            .lock()
            .expect("lock poisoned")
            .get(&(kind.to_owned(), namespace.to_owned(), name.to_owned()))
            .cloned()
    }

    /// Number of stored resources of a kind.
    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.resources
            .lock()
            .expect("lock poisoned")
            .keys()
            .filter(|(k, _, _)| k == kind)
            .count()
    }

    /// Packages installed, as (name, namespace).
    #[must_use]
    pub fn packages(&self) -> Vec<(String, String)> {
        self.packages.lock().expect("lock poisoned").clone()
    }

    fn store<R: ClusterResource>(&self, resource: &R) -> CellResult<()> {
        let value =
            serde_json::to_value(resource).map_err(|e| CellError::cluster(e.to_string()))?;
        self.resources.lock().expect("lock poisoned").insert(
            (
                R::KIND.to_owned(),
                resource.namespace().to_owned(),
                resource.name().to_owned(),
            ),
            value,
        );
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn nodes(&self) -> CellResult<Vec<NodeAddresses>> {
        Ok(self.nodes.lock().expect("lock poisoned").clone())
    }

    async fn apply_namespace(&self, resource: &Namespace) -> CellResult<()> {
        self.store(resource)
    }

    async fn apply_secret(&self, resource: &Secret) -> CellResult<()> {
        self.store(resource)
    }

    async fn apply_ip_address_pool(&self, resource: &IpAddressPool) -> CellResult<()> {
        self.store(resource)
    }

    async fn apply_l2_advertisement(&self, resource: &L2Advertisement) -> CellResult<()> {
        self.store(resource)
    }

    async fn apply_cluster_issuer(&self, resource: &ClusterIssuer) -> CellResult<()> {
        self.store(resource)
    }

    async fn apply_certificate(&self, resource: &Certificate) -> CellResult<()> {
        self.store(resource)
    }

    async fn apply_gateway(&self, resource: &Gateway) -> CellResult<()> {
        self.store(resource)
    }

    async fn apply_http_route(&self, resource: &HttpRoute) -> CellResult<()> {
        self.store(resource)
    }

    async fn apply_pvc(&self, resource: &PersistentVolumeClaim) -> CellResult<()> {
        self.store(resource)
    }

    async fn apply_workload(&self, resource: &Workload) -> CellResult<()> {
        self.store(resource)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> CellResult<Option<Secret>> {
        let stored = self.resource("Secret", namespace, name);
        match stored {
            Some(value) => Ok(Some(
                serde_json::from_value(value).map_err(|e| CellError::cluster(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    async fn wait_certificate_ready(
        &self,
        namespace: &str,
        name: &str,
        _timeout: Duration,
    ) -> CellResult<()> {
        if self.resource("Certificate", namespace, name).is_none() {
            return Err(CellError::cluster(format!(
                "certificate {namespace}/{name} does not exist"
            )));
        }
        if self.certificates_ready {
            Ok(())
        } else {
            Err(CellError::Timeout(format!("certificate {namespace}/{name}")))
        }
    }

    async fn workload_state(&self, namespace: &str, name: &str) -> CellResult<WorkloadState> {
        let stored = self
            .resource("Workload", namespace, name)
            .ok_or_else(|| CellError::cluster(format!("workload {namespace}/{name} missing")))?;
        let workload: Workload =
            serde_json::from_value(stored).map_err(|e| CellError::cluster(e.to_string()))?;
        let ready = self
            .ready_workloads
            .lock()
            .expect("lock poisoned")
            .contains(&(namespace.to_owned(), name.to_owned()));
        Ok(WorkloadState {
            ready_replicas: if ready { workload.replicas } else { 0 },
            total_replicas: workload.replicas,
            failure: None,
        })
    }

    async fn workload_logs(
        &self,
        _namespace: &str,
        _name: &str,
        _since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> CellResult<Vec<(chrono::DateTime<chrono::Utc>, String)>> {
        Ok(Vec::new())
    }

    async fn node_usage(&self) -> CellResult<Vec<NodeUsage>> {
        let nodes = self.nodes.lock().expect("lock poisoned");
        Ok(nodes
            .iter()
            .map(|_| NodeUsage {
                cpu_usage_cores: 0.1,
                memory_usage_mib: 512,
                disk_usage_gib: 4,
            })
            .collect())
    }

    async fn build_image(
        &self,
        app: &str,
        tag: &str,
        _context_dir: &std::path::Path,
    ) -> CellResult<String> {
        Ok(format!("registry.local/{app}:{tag}"))
    }

    async fn install_package(
        &self,
        name: &str,
        namespace: &str,
        _values: serde_json::Value,
    ) -> CellResult<()> {
        let mut packages = self.packages.lock().expect("lock poisoned");
        let entry = (name.to_owned(), namespace.to_owned());
        if !packages.contains(&entry) {
            packages.push(entry);
        }
        Ok(())
    }
}

/// Connector returning one shared fake client.
#[derive(Debug, Clone)]
pub struct FakeClusterConnector {
    client: Arc<FakeClusterClient>,
}

impl FakeClusterConnector {
    #[must_use]
    pub fn new(client: Arc<FakeClusterClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterConnector for FakeClusterConnector {
    async fn connect(&self, _kubeconfig: &str) -> CellResult<Arc<dyn ClusterClient>> {
        Ok(self.client.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn apply_twice_equals_apply_once() {
        let cluster = FakeClusterClient::new();
        let pool = IpAddressPool {
            namespace: "metallb-system".to_owned(),
            name: "default".to_owned(),
            addresses: vec!["203.0.113.9/32".to_owned()],
        };

        cluster.apply_ip_address_pool(&pool).await.expect("apply");
        let after_first = cluster.resource("IPAddressPool", "metallb-system", "default");
        cluster.apply_ip_address_pool(&pool).await.expect("apply");
        let after_second = cluster.resource("IPAddressPool", "metallb-system", "default");

        assert_eq!(after_first, after_second);
        assert_eq!(cluster.count("IPAddressPool"), 1);
    }

    #[tokio::test]
    async fn update_replaces_spec_in_place() {
        let cluster = FakeClusterClient::new();
        let mut pool = IpAddressPool {
            namespace: "metallb-system".to_owned(),
            name: "default".to_owned(),
            addresses: vec!["203.0.113.9/32".to_owned()],
        };
        cluster.apply_ip_address_pool(&pool).await.expect("apply");

        pool.addresses.push("203.0.113.10/32".to_owned());
        cluster.apply_ip_address_pool(&pool).await.expect("apply");

        let stored = cluster
            .resource("IPAddressPool", "metallb-system", "default")
            .expect("stored");
        let addresses = stored["addresses"].as_array().expect("addresses");
        assert_eq!(addresses.len(), 2);
        assert_eq!(cluster.count("IPAddressPool"), 1);
    }

    #[tokio::test]
    async fn workload_readiness_is_observable() {
        let cluster = FakeClusterClient::new();
        let workload = Workload {
            namespace: "app-web-dev".to_owned(),
            name: "web".to_owned(),
            image: "ghcr.io/example/web:1".to_owned(),
            replicas: 2,
            ports: vec![8080],
            env: BTreeMap::new(),
            annotations: BTreeMap::new(),
        };
        cluster.apply_workload(&workload).await.expect("apply");

        let state = cluster
            .workload_state("app-web-dev", "web")
            .await
            .expect("state");
        assert!(!state.is_ready());

        cluster.set_workload_ready("app-web-dev", "web");
        let state = cluster
            .workload_state("app-web-dev", "web")
            .await
            .expect("state");
        assert!(state.is_ready());
    }
}
