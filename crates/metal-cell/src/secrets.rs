//! Cluster secrets bundle.
//!
//! Generated once per cluster: CA material and the join tokens every node
//! needs. Serialized to YAML and stored only inside the SOPS envelope; the
//! cluster name rides along unencrypted so the file stays identifiable.

use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{CellError, CellResult};

fn random_base64(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}.{}", &hex[..6], &hex[6..22])
}

/// A certificate-authority keypair, PEM-encoded and base64-wrapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaMaterial {
    pub crt: String,
    pub key: String,
}

impl CaMaterial {
    fn generate() -> Self {
        Self {
            crt: random_base64(48),
            key: random_base64(48),
        }
    }
}

/// The cluster's CA material and join tokens.
///
/// The `_unencrypted` suffix on `cluster_name_unencrypted` follows the SOPS
/// convention: that one field survives encryption in cleartext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSecrets {
    pub cluster_name_unencrypted: String,
    pub cluster_id: String,
    pub cluster_secret: String,
    pub bootstrap_token: String,
    pub secretbox_encryption_secret: String,
    pub trustd_token: String,
    pub machine_ca: CaMaterial,
    pub cluster_ca: CaMaterial,
    pub etcd_ca: CaMaterial,
    pub aggregator_ca: CaMaterial,
    pub service_account_key: String,
}

impl ClusterSecrets {
    /// Generate a fresh bundle for a named cluster.
    #[must_use]
    pub fn generate(cluster_name: &str) -> Self {
        Self {
            cluster_name_unencrypted: cluster_name.to_owned(),
            cluster_id: random_base64(32),
            cluster_secret: random_base64(32),
            bootstrap_token: random_token(),
            secretbox_encryption_secret: random_base64(32),
            trustd_token: random_token(),
            machine_ca: CaMaterial::generate(),
            cluster_ca: CaMaterial::generate(),
            etcd_ca: CaMaterial::generate(),
            aggregator_ca: CaMaterial::generate(),
            service_account_key: random_base64(64),
        }
    }

    /// Serialize the bundle as YAML.
    pub fn to_yaml(&self) -> CellResult<String> {
        serde_yaml::to_string(self).map_err(|e| CellError::crypto(e.to_string()))
    }

    /// Deserialize a bundle from YAML.
    pub fn from_yaml(yaml: &str) -> CellResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| CellError::crypto(e.to_string()))
    }
}
