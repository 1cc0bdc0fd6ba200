//! Talos cell provisioning.
//!
//! Turns one freshly installed node running the immutable OS in maintenance
//! mode into a one-node cluster ready for user workloads: DNS record, disk
//! discovery, cluster config generation, secrets encryption under the
//! team's age key, config apply and bootstrap, a committed-and-archived
//! config working tree, and the platform add-ons (load-balancer pool,
//! cert-manager issuers, external-dns, gateway, private registry).

mod archive;
mod cluster;
mod error;
mod maintenance;
mod names;
mod provider;
mod provision;
mod reconcile;
mod secrets;
mod sops;
mod talosconfig;

pub use archive::{commit_and_archive, unpack_archive};
pub use cluster::{
    Certificate, ClusterClient, ClusterConnector, ClusterIssuer, ClusterResource,
    FakeClusterClient, FakeClusterConnector, Gateway, GatewayListener, HttpRoute, IpAddressPool,
    L2Advertisement, Namespace, NodeAddresses, NodeUsage, PersistentVolumeClaim, Secret,
    Workload, WorkloadState,
};
pub use error::{CellError, CellResult};
pub use maintenance::{Disk, HttpMaintenanceApi, MaintenanceApi, MockMaintenanceApi};
pub use names::{cell_host, registry_host, server_host, wildcard_host};
pub use provider::TalosCellProvider;
pub use provision::{ProvisionerConfig, Provisioner};
pub use secrets::ClusterSecrets;
pub use sops::{decrypt_yaml, encrypt_yaml};
pub use talosconfig::{ClusterSpec, NodeSpec, KUBERNETES_VERSION, TALOS_VERSION};
