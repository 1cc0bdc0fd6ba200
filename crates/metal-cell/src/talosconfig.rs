//! Declarative cluster spec and rendered configs.
//!
//! [`ClusterSpec`] is the `talconfig.yaml` committed into the cell's config
//! repository; rendering combines it with the secrets bundle to produce the
//! per-node machine configs, the admin `talosconfig`, and the cluster
//! `kubeconfig`.

use serde::{Deserialize, Serialize};

use crate::error::{CellError, CellResult};
use crate::secrets::ClusterSecrets;

/// Kubernetes version every new cell pins.
pub const KUBERNETES_VERSION: &str = "1.30.3";

/// OS version every new cell pins.
pub const TALOS_VERSION: &str = "v1.7.6";

/// One node in the cluster spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub hostname: String,
    pub ip_address: String,
    pub control_plane: bool,
    /// Device path the OS installed itself onto.
    pub install_disk: String,
    /// Labels applied to the node object.
    pub node_labels: Vec<(String, String)>,
}

/// The declarative cluster spec, one per cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub cluster_name: String,
    /// `https://{server_id}.{apex}:6443`.
    pub endpoint: String,
    pub kubernetes_version: String,
    pub talos_version: String,
    /// Single-node clusters schedule workloads on the control plane.
    pub allow_scheduling_on_control_planes: bool,
    pub nodes: Vec<NodeSpec>,
    /// Config patches applied to every node.
    pub patches: Vec<String>,
}

impl ClusterSpec {
    /// Build the spec for a one-node cluster with the fixed platform
    /// decisions baked in.
    #[must_use]
    pub fn single_node(
        cluster_name: &str,
        endpoint: &str,
        node: NodeSpec,
    ) -> Self {
        Self {
            cluster_name: cluster_name.to_owned(),
            endpoint: endpoint.to_owned(),
            kubernetes_version: KUBERNETES_VERSION.to_owned(),
            talos_version: TALOS_VERSION.to_owned(),
            allow_scheduling_on_control_planes: true,
            nodes: vec![node],
            patches: vec![
                PATCH_CLUSTER_DISCOVERY.to_owned(),
                PATCH_KUBESPAN.to_owned(),
                PATCH_ROTATE_SERVER_CERTS.to_owned(),
            ],
        }
    }

    /// Serialize the spec as `talconfig.yaml`.
    pub fn to_yaml(&self) -> CellResult<String> {
        serde_yaml::to_string(self).map_err(|e| CellError::config(e.to_string()))
    }

    /// Render the machine config for one node, combining the spec with the
    /// secrets bundle.
    pub fn render_machine_config(
        &self,
        node: &NodeSpec,
        secrets: &ClusterSecrets,
    ) -> CellResult<String> {
        let labels: String = node
            .node_labels
            .iter()
            .map(|(k, v)| format!("        {k}: {v}\n"))
            .collect();
        let patches: String = self
            .patches
            .iter()
            .map(|p| {
                let indented: String = p.lines().map(|l| format!("  {l}\n")).collect();
                format!("- |\n{indented}")
            })
            .collect();

        Ok(format!(
            "\
version: v1alpha1
machine:
  type: {machine_type}
  token: {token}
  ca:
    crt: {machine_crt}
    key: {machine_key}
  certSANs:
    - {ip}
  kubelet:
    nodeLabels:
{labels}\
  install:
    disk: {disk}
    image: ghcr.io/siderolabs/installer:{talos_version}
  network:
    hostname: {hostname}
cluster:
  id: {cluster_id}
  secret: {cluster_secret}
  controlPlane:
    endpoint: {endpoint}
  clusterName: {cluster_name}
  token: {bootstrap_token}
  secretboxEncryptionSecret: {secretbox}
  ca:
    crt: {cluster_crt}
    key: {cluster_key}
  etcd:
    ca:
      crt: {etcd_crt}
      key: {etcd_key}
  allowSchedulingOnControlPlanes: {allow_scheduling}
patches:
{patches}",
            machine_type = if node.control_plane {
                "controlplane"
            } else {
                "worker"
            },
            token = secrets.trustd_token,
            machine_crt = secrets.machine_ca.crt,
            machine_key = secrets.machine_ca.key,
            ip = node.ip_address,
            labels = labels,
            disk = node.install_disk,
            talos_version = self.talos_version,
            hostname = node.hostname,
            cluster_id = secrets.cluster_id,
            cluster_secret = secrets.cluster_secret,
            endpoint = self.endpoint,
            cluster_name = self.cluster_name,
            bootstrap_token = secrets.bootstrap_token,
            secretbox = secrets.secretbox_encryption_secret,
            cluster_crt = secrets.cluster_ca.crt,
            cluster_key = secrets.cluster_ca.key,
            etcd_crt = secrets.etcd_ca.crt,
            etcd_key = secrets.etcd_ca.key,
            allow_scheduling = self.allow_scheduling_on_control_planes,
            patches = patches,
        ))
    }

    /// Render the admin `talosconfig` for the cluster.
    pub fn render_talosconfig(&self, secrets: &ClusterSecrets) -> CellResult<String> {
        let nodes: String = self
            .nodes
            .iter()
            .map(|n| format!("            - {}\n", n.ip_address))
            .collect();
        Ok(format!(
            "\
context: {name}
contexts:
    {name}:
        endpoints:
{nodes}\
        ca: {ca}
        crt: {crt}
        key: {key}
",
            name = self.cluster_name,
            nodes = nodes,
            ca = secrets.machine_ca.crt,
            crt = secrets.machine_ca.crt,
            key = secrets.machine_ca.key,
        ))
    }

    /// Render the cluster `kubeconfig`.
    pub fn render_kubeconfig(&self, secrets: &ClusterSecrets) -> CellResult<String> {
        Ok(format!(
            "\
apiVersion: v1
kind: Config
clusters:
    - name: {name}
      cluster:
        server: {endpoint}
        certificate-authority-data: {ca}
contexts:
    - name: admin@{name}
      context:
        cluster: {name}
        user: admin@{name}
current-context: admin@{name}
users:
    - name: admin@{name}
      user:
        client-certificate-data: {crt}
        client-key-data: {key}
",
            name = self.cluster_name,
            endpoint = self.endpoint,
            ca = secrets.cluster_ca.crt,
            crt = secrets.cluster_ca.crt,
            key = secrets.cluster_ca.key,
        ))
    }
}

/// Enable cluster discovery.
const PATCH_CLUSTER_DISCOVERY: &str = "\
cluster:
  discovery:
    enabled: true";

/// Enable the node-to-node mesh.
const PATCH_KUBESPAN: &str = "\
machine:
  network:
    kubespan:
      enabled: true";

/// Enable kubelet server certificate rotation.
const PATCH_ROTATE_SERVER_CERTS: &str = "\
machine:
  kubelet:
    extraArgs:
      rotate-server-certificates: true";

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_node() -> NodeSpec {
        NodeSpec {
            hostname: "server_01jabc.example.dev".to_owned(),
            ip_address: "203.0.113.9".to_owned(),
            control_plane: true,
            install_disk: "/dev/nvme0n1".to_owned(),
            node_labels: vec![
                ("metal.dev/server".to_owned(), "server_01jabc".to_owned()),
                ("metal.dev/cell".to_owned(), "cell_01jxyz".to_owned()),
                ("metal.dev/name".to_owned(), "default".to_owned()),
            ],
        }
    }

    #[test]
    fn single_node_spec_has_fixed_decisions() {
        let spec = ClusterSpec::single_node(
            "cell-01jxyz",
            "https://server_01jabc.example.dev:6443",
            sample_node(),
        );
        assert!(spec.allow_scheduling_on_control_planes);
        assert_eq!(spec.kubernetes_version, KUBERNETES_VERSION);
        assert_eq!(spec.talos_version, TALOS_VERSION);
        assert_eq!(spec.patches.len(), 3);
        assert_eq!(spec.nodes.len(), 1);
    }

    #[test]
    fn machine_config_carries_secrets_and_labels() {
        let spec = ClusterSpec::single_node(
            "cell-01jxyz",
            "https://server_01jabc.example.dev:6443",
            sample_node(),
        );
        let secrets = ClusterSecrets::generate("cell-01jxyz");
        let config = spec
            .render_machine_config(&spec.nodes[0], &secrets)
            .expect("render");

        assert!(config.contains("type: controlplane"));
        assert!(config.contains(&format!("token: {}", secrets.bootstrap_token)));
        assert!(config.contains("metal.dev/server: server_01jabc"));
        assert!(config.contains("disk: /dev/nvme0n1"));
        assert!(config.contains("allowSchedulingOnControlPlanes: true"));
        assert!(config.contains("rotate-server-certificates: true"));
        assert!(config.contains("discovery:"));
        assert!(config.contains("kubespan:"));
    }

    #[test]
    fn rendered_credentials_are_nonempty_yaml() {
        let spec = ClusterSpec::single_node(
            "cell-01jxyz",
            "https://server_01jabc.example.dev:6443",
            sample_node(),
        );
        let secrets = ClusterSecrets::generate("cell-01jxyz");

        let talosconfig = spec.render_talosconfig(&secrets).expect("talosconfig");
        assert!(talosconfig.contains("context: cell-01jxyz"));
        assert!(talosconfig.contains("203.0.113.9"));
        serde_yaml::from_str::<serde_yaml::Value>(&talosconfig).expect("valid yaml");

        let kubeconfig = spec.render_kubeconfig(&secrets).expect("kubeconfig");
        assert!(kubeconfig.contains("server: https://server_01jabc.example.dev:6443"));
        serde_yaml::from_str::<serde_yaml::Value>(&kubeconfig).expect("valid yaml");
    }

    #[test]
    fn talconfig_round_trips_through_yaml() {
        let spec = ClusterSpec::single_node(
            "cell-01jxyz",
            "https://server_01jabc.example.dev:6443",
            sample_node(),
        );
        let yaml = spec.to_yaml().expect("serialize");
        let back: ClusterSpec = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back.cluster_name, spec.cluster_name);
        assert_eq!(back.nodes.len(), 1);
    }
}
