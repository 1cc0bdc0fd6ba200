//! Platform add-on reconciliation.
//!
//! Everything a fresh cell needs before user workloads arrive: the
//! load-balancer address pool, the ACME issuers, external-dns, the shared
//! gateway with its wildcard certificate, and the private registry. Every
//! function is create-or-update and safe to run on every janitor pass.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

use metal_providers::DnsProvider;

use crate::cluster::{
    Certificate, ClusterClient, ClusterIssuer, Gateway, GatewayListener, HttpRoute,
    IpAddressPool, L2Advertisement, Namespace, PersistentVolumeClaim, Secret,
};
use crate::error::{CellError, CellResult};
use crate::names::{registry_host, wildcard_host};

const ACME_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";
const ACME_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";

/// How long the gateway certificate may take to become ready.
const CERTIFICATE_WAIT: Duration = Duration::from_secs(180);

const REGISTRY_USER_LEN: usize = 16;
const REGISTRY_PASS_LEN: usize = 32;

/// Run every add-on reconciliation against a cell.
pub async fn reconcile_addons(
    cluster: &dyn ClusterClient,
    dns: &dyn DnsProvider,
    dns_api_token: &str,
    cell_id: &str,
) -> CellResult<()> {
    ensure_load_balancer_pool(cluster).await?;
    ensure_cert_issuers(cluster, dns, dns_api_token).await?;
    ensure_external_dns(cluster, dns, dns_api_token).await?;
    ensure_gateway(cluster, cell_id, dns.domain()).await?;
    ensure_registry(cluster, cell_id, dns.domain()).await?;
    Ok(())
}

/// Derive a `/32` pool from every node's public addresses and advertise it.
///
/// Both the node's external IPs and any internal IP that is not
/// RFC-1918-private count; bare-metal nodes often report their public
/// address as internal.
pub async fn ensure_load_balancer_pool(cluster: &dyn ClusterClient) -> CellResult<()> {
    let nodes = cluster.nodes().await?;
    let mut addresses = Vec::new();
    for node in &nodes {
        for ip in node.external_ips.iter().chain(
            node.internal_ips
                .iter()
                .filter(|ip| !is_private_ipv4(ip)),
        ) {
            let cidr = format!("{ip}/32");
            if !addresses.contains(&cidr) {
                addresses.push(cidr);
            }
        }
    }
    if addresses.is_empty() {
        return Err(CellError::cluster("no public node addresses for pool"));
    }

    debug!(addresses = ?addresses, "ensuring load balancer pool");
    cluster
        .apply_namespace(&Namespace {
            name: "metallb-system".to_owned(),
        })
        .await?;
    cluster
        .apply_ip_address_pool(&IpAddressPool {
            namespace: "metallb-system".to_owned(),
            name: "default".to_owned(),
            addresses,
        })
        .await?;
    cluster
        .apply_l2_advertisement(&L2Advertisement {
            namespace: "metallb-system".to_owned(),
            name: "default".to_owned(),
            pools: vec!["default".to_owned()],
        })
        .await?;
    Ok(())
}

fn is_private_ipv4(ip: &str) -> bool {
    ip.parse::<Ipv4Addr>().is_ok_and(|addr| {
        addr.is_private() || addr.is_loopback() || addr.is_link_local() || addr.is_unspecified()
    })
}

/// Ensure the DNS token secret and both letsencrypt cluster issuers.
pub async fn ensure_cert_issuers(
    cluster: &dyn ClusterClient,
    dns: &dyn DnsProvider,
    dns_api_token: &str,
) -> CellResult<()> {
    let issuer_config = dns.cert_issuer_config();

    cluster
        .apply_namespace(&Namespace {
            name: "cert-manager".to_owned(),
        })
        .await?;
    cluster
        .apply_secret(&Secret {
            namespace: "cert-manager".to_owned(),
            name: issuer_config.token_secret_name.clone(),
            secret_type: "Opaque".to_owned(),
            data: BTreeMap::from([(
                issuer_config.token_secret_key.clone(),
                dns_api_token.as_bytes().to_vec(),
            )]),
        })
        .await?;

    for (name, server) in [
        ("letsencrypt-staging", ACME_STAGING),
        ("letsencrypt-production", ACME_PRODUCTION),
    ] {
        cluster
            .apply_cluster_issuer(&ClusterIssuer {
                name: name.to_owned(),
                acme_server: server.to_owned(),
                email: issuer_config.acme_email.clone(),
                token_secret: (
                    issuer_config.token_secret_name.clone(),
                    issuer_config.token_secret_key.clone(),
                ),
            })
            .await?;
    }
    Ok(())
}

/// Install external-dns wired to the DNS provider.
pub async fn ensure_external_dns(
    cluster: &dyn ClusterClient,
    dns: &dyn DnsProvider,
    dns_api_token: &str,
) -> CellResult<()> {
    let config = dns.external_dns_config();

    cluster
        .apply_namespace(&Namespace {
            name: "external-dns".to_owned(),
        })
        .await?;
    for (_, secret_name) in &config.env_secrets {
        cluster
            .apply_secret(&Secret {
                namespace: "external-dns".to_owned(),
                name: secret_name.clone(),
                secret_type: "Opaque".to_owned(),
                data: BTreeMap::from([(
                    "api-token".to_owned(),
                    dns_api_token.as_bytes().to_vec(),
                )]),
            })
            .await?;
    }
    cluster
        .install_package(
            "external-dns",
            "external-dns",
            serde_json::json!({
                "provider": config.provider,
                "domainFilters": config.domain_filters,
            }),
        )
        .await?;
    Ok(())
}

/// Ensure the shared gateway and its wildcard certificate.
pub async fn ensure_gateway(
    cluster: &dyn ClusterClient,
    cell_id: &str,
    apex: &str,
) -> CellResult<()> {
    let wildcard = wildcard_host(cell_id, apex);

    cluster
        .apply_namespace(&Namespace {
            name: "gateway".to_owned(),
        })
        .await?;
    cluster
        .apply_certificate(&Certificate {
            namespace: "gateway".to_owned(),
            name: "wildcard".to_owned(),
            secret_name: "wildcard-tls".to_owned(),
            dns_names: vec![wildcard.clone()],
            issuer: "letsencrypt-production".to_owned(),
        })
        .await?;

    info!(hostname = %wildcard, "waiting for wildcard certificate");
    cluster
        .wait_certificate_ready("gateway", "wildcard", CERTIFICATE_WAIT)
        .await?;

    cluster
        .apply_gateway(&Gateway {
            namespace: "gateway".to_owned(),
            name: "gateway".to_owned(),
            listeners: vec![
                GatewayListener {
                    name: "http".to_owned(),
                    port: 80,
                    protocol: "HTTP".to_owned(),
                    hostname: wildcard.clone(),
                    tls_secret: None,
                },
                GatewayListener {
                    name: "https".to_owned(),
                    port: 443,
                    protocol: "HTTPS".to_owned(),
                    hostname: wildcard.clone(),
                    tls_secret: Some("wildcard-tls".to_owned()),
                },
            ],
            annotations: BTreeMap::from([(
                "external-dns.alpha.kubernetes.io/hostname".to_owned(),
                wildcard,
            )]),
        })
        .await?;
    Ok(())
}

/// Ensure the cell's private registry: storage, credentials, the package
/// itself, and the route to it.
pub async fn ensure_registry(
    cluster: &dyn ClusterClient,
    cell_id: &str,
    apex: &str,
) -> CellResult<()> {
    let host = registry_host(cell_id, apex);

    cluster
        .apply_namespace(&Namespace {
            name: "registry".to_owned(),
        })
        .await?;
    cluster
        .apply_pvc(&PersistentVolumeClaim {
            namespace: "registry".to_owned(),
            name: "registry-data".to_owned(),
            storage_class: "shared".to_owned(),
            access_mode: "ReadWriteMany".to_owned(),
            size_gib: 10,
        })
        .await?;

    // Generated credentials survive re-runs: an existing secret wins.
    let (user, pass) = match cluster.get_secret("registry", "registry-creds").await? {
        Some(existing) => {
            let user = existing
                .data
                .get("username")
                .and_then(|b| String::from_utf8(b.clone()).ok())
                .ok_or_else(|| CellError::cluster("registry creds missing username"))?;
            let pass = existing
                .data
                .get("password")
                .and_then(|b| String::from_utf8(b.clone()).ok())
                .ok_or_else(|| CellError::cluster("registry creds missing password"))?;
            (user, pass)
        }
        None => {
            let user = random_alphanumeric(REGISTRY_USER_LEN);
            let pass = random_alphanumeric(REGISTRY_PASS_LEN);
            cluster
                .apply_secret(&Secret {
                    namespace: "registry".to_owned(),
                    name: "registry-creds".to_owned(),
                    secret_type: "Opaque".to_owned(),
                    data: BTreeMap::from([
                        ("username".to_owned(), user.as_bytes().to_vec()),
                        ("password".to_owned(), pass.as_bytes().to_vec()),
                    ]),
                })
                .await?;
            (user, pass)
        }
    };

    let htpasswd = format!(
        "{user}:{}",
        bcrypt::hash(&pass, bcrypt::DEFAULT_COST)
            .map_err(|e| CellError::crypto(format!("htpasswd hash failed: {e}")))?
    );
    cluster
        .apply_secret(&Secret {
            namespace: "registry".to_owned(),
            name: "registry-htpasswd".to_owned(),
            secret_type: "Opaque".to_owned(),
            data: BTreeMap::from([("htpasswd".to_owned(), htpasswd.into_bytes())]),
        })
        .await?;

    let auth = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
    let mut auths = serde_json::Map::new();
    auths.insert(
        host.clone(),
        serde_json::json!({
            "username": user,
            "password": pass,
            "auth": auth,
        }),
    );
    let dockerconfig = serde_json::json!({ "auths": auths });
    cluster
        .apply_secret(&Secret {
            namespace: "registry".to_owned(),
            name: "registry-pull".to_owned(),
            secret_type: "kubernetes.io/dockerconfigjson".to_owned(),
            data: BTreeMap::from([(
                ".dockerconfigjson".to_owned(),
                serde_json::to_vec(&dockerconfig)
                    .map_err(|e| CellError::cluster(e.to_string()))?,
            )]),
        })
        .await?;

    cluster
        .install_package(
            "registry",
            "registry",
            serde_json::json!({
                "persistence": { "existingClaim": "registry-data" },
                "auth": { "htpasswdSecret": "registry-htpasswd" },
            }),
        )
        .await?;

    cluster
        .apply_http_route(&HttpRoute {
            namespace: "registry".to_owned(),
            name: "registry".to_owned(),
            hostnames: vec![host],
            backend_service: "registry".to_owned(),
            backend_port: 5000,
        })
        .await?;
    Ok(())
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{FakeClusterClient, NodeAddresses};
    use metal_providers::MockDnsProvider;

    fn one_node_cluster() -> FakeClusterClient {
        let cluster = FakeClusterClient::new();
        cluster.set_nodes(vec![NodeAddresses {
            external_ips: vec!["203.0.113.9".to_owned()],
            internal_ips: vec!["10.0.0.5".to_owned(), "198.51.100.7".to_owned()],
        }]);
        cluster
    }

    #[tokio::test]
    async fn pool_includes_public_internal_addresses_only() {
        let cluster = one_node_cluster();
        ensure_load_balancer_pool(&cluster).await.expect("pool");

        let pool = cluster
            .resource("IPAddressPool", "metallb-system", "default")
            .expect("pool resource");
        let addresses: Vec<String> =
            serde_json::from_value(pool["addresses"].clone()).expect("addresses");
        assert!(addresses.contains(&"203.0.113.9/32".to_owned()));
        assert!(addresses.contains(&"198.51.100.7/32".to_owned()));
        assert!(!addresses.iter().any(|a| a.starts_with("10.")));
    }

    #[tokio::test]
    async fn no_public_addresses_is_an_error() {
        let cluster = FakeClusterClient::new();
        cluster.set_nodes(vec![NodeAddresses {
            external_ips: vec![],
            internal_ips: vec!["10.0.0.5".to_owned()],
        }]);
        assert!(ensure_load_balancer_pool(&cluster).await.is_err());
    }

    #[tokio::test]
    async fn both_issuers_are_created() {
        let cluster = one_node_cluster();
        let dns = MockDnsProvider::new("example.dev");
        ensure_cert_issuers(&cluster, &dns, "token-123")
            .await
            .expect("issuers");

        let staging = cluster
            .resource("ClusterIssuer", "", "letsencrypt-staging")
            .expect("staging issuer");
        assert_eq!(staging["acme_server"].as_str(), Some(ACME_STAGING));
        let production = cluster
            .resource("ClusterIssuer", "", "letsencrypt-production")
            .expect("production issuer");
        assert_eq!(production["acme_server"].as_str(), Some(ACME_PRODUCTION));
    }

    #[tokio::test]
    async fn gateway_terminates_tls_on_wildcard() {
        let cluster = one_node_cluster();
        ensure_gateway(&cluster, "cell_01jx", "example.dev")
            .await
            .expect("gateway");

        let gateway = cluster
            .resource("Gateway", "gateway", "gateway")
            .expect("gateway resource");
        let listeners = gateway["listeners"].as_array().expect("listeners");
        assert_eq!(listeners.len(), 2);
        assert_eq!(listeners[0]["port"], 80);
        assert_eq!(listeners[1]["port"], 443);
        assert_eq!(listeners[1]["tls_secret"].as_str(), Some("wildcard-tls"));
        assert_eq!(
            listeners[1]["hostname"].as_str(),
            Some("*.cell-01jx.up.example.dev")
        );
        assert_eq!(
            gateway["annotations"]["external-dns.alpha.kubernetes.io/hostname"].as_str(),
            Some("*.cell-01jx.up.example.dev")
        );
    }

    #[tokio::test]
    async fn registry_credentials_survive_rerun() {
        let cluster = one_node_cluster();
        ensure_registry(&cluster, "cell_01jx", "example.dev")
            .await
            .expect("first run");
        let first = cluster
            .resource("Secret", "registry", "registry-creds")
            .expect("creds");

        ensure_registry(&cluster, "cell_01jx", "example.dev")
            .await
            .expect("second run");
        let second = cluster
            .resource("Secret", "registry", "registry-creds")
            .expect("creds");

        assert_eq!(first, second, "credentials must not be regenerated");
    }

    #[tokio::test]
    async fn registry_has_storage_and_route() {
        let cluster = one_node_cluster();
        ensure_registry(&cluster, "cell_01jx", "example.dev")
            .await
            .expect("registry");

        let pvc = cluster
            .resource("PersistentVolumeClaim", "registry", "registry-data")
            .expect("pvc");
        assert_eq!(pvc["access_mode"].as_str(), Some("ReadWriteMany"));
        assert_eq!(pvc["size_gib"], 10);

        let route = cluster
            .resource("HTTPRoute", "registry", "registry")
            .expect("route");
        assert_eq!(
            route["hostnames"][0].as_str(),
            Some("registry.cell-01jx.up.example.dev")
        );

        assert!(cluster
            .packages()
            .contains(&("registry".to_owned(), "registry".to_owned())));
    }

    #[tokio::test]
    async fn full_reconcile_is_idempotent() {
        let cluster = one_node_cluster();
        let dns = MockDnsProvider::new("example.dev");

        reconcile_addons(&cluster, &dns, "token-123", "cell_01jx")
            .await
            .expect("first pass");
        let issuers = cluster.count("ClusterIssuer");
        let secrets = cluster.count("Secret");

        reconcile_addons(&cluster, &dns, "token-123", "cell_01jx")
            .await
            .expect("second pass");
        assert_eq!(cluster.count("ClusterIssuer"), issuers);
        assert_eq!(cluster.count("Secret"), secrets);
    }
}
