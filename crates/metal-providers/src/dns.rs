//! DNS provider interface.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};

/// Configuration for issuing ACME-DNS01 certificates through the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertIssuerConfig {
    /// Name of the in-cluster secret holding the provider API token.
    pub token_secret_name: String,
    /// Key within that secret.
    pub token_secret_key: String,
    /// Email registered with the ACME account.
    pub acme_email: String,
}

/// Description of an external-dns installation wired to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalDnsConfig {
    /// Provider name as external-dns understands it.
    pub provider: String,
    /// Zones external-dns is allowed to manage.
    pub domain_filters: Vec<String>,
    /// Environment variables carrying credentials, by name.
    pub env_secrets: Vec<(String, String)>,
}

/// A DNS provider managing one apex domain.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// The apex domain all hostnames live under.
    fn domain(&self) -> &str;

    /// Ensure an A record `name` → `ipv4` exists in the zone.
    ///
    /// Idempotent: an existing record with matching content succeeds; an
    /// existing record with different content fails, because overwriting a
    /// record someone else owns is never the right move.
    async fn find_or_create_a_record(
        &self,
        zone_id: &str,
        name: &str,
        ipv4: &str,
    ) -> ProviderResult<()>;

    /// The cert-issuer configuration for ACME-DNS01 through this provider.
    fn cert_issuer_config(&self) -> CertIssuerConfig;

    /// The external-dns install description for this provider.
    fn external_dns_config(&self) -> ExternalDnsConfig;
}

/// Mock DNS provider backed by an in-memory record set.
#[derive(Debug)]
pub struct MockDnsProvider {
    domain: String,
    records: Mutex<HashMap<(String, String), String>>,
}

impl MockDnsProvider {
    #[must_use]
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            records: Mutex::new(HashMap::new()),
        }
    }

    /// The A record currently held for (zone, name).
    #[must_use]
    pub fn record(&self, zone_id: &str, name: &str) -> Option<String> {
        self.records
            .lock()
            .expect("lock poisoned")
            .get(&(zone_id.to_owned(), name.to_owned()))
            .cloned()
    }
}

#[async_trait]
impl DnsProvider for MockDnsProvider {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn find_or_create_a_record(
        &self,
        zone_id: &str,
        name: &str,
        ipv4: &str,
    ) -> ProviderResult<()> {
        let mut records = self.records.lock().expect("lock poisoned");
        let key = (zone_id.to_owned(), name.to_owned());
        match records.get(&key) {
            Some(existing) if existing == ipv4 => Ok(()),
            Some(existing) => Err(ProviderError::Rejected(format!(
                "record {name} exists with different content: {existing}"
            ))),
            None => {
                records.insert(key, ipv4.to_owned());
                Ok(())
            }
        }
    }

    fn cert_issuer_config(&self) -> CertIssuerConfig {
        CertIssuerConfig {
            token_secret_name: "dns-api-token".to_owned(),
            token_secret_key: "api-token".to_owned(),
            acme_email: format!("ops@{}", self.domain),
        }
    }

    fn external_dns_config(&self) -> ExternalDnsConfig {
        ExternalDnsConfig {
            provider: "mock".to_owned(),
            domain_filters: vec![self.domain.clone()],
            env_secrets: vec![("DNS_API_TOKEN".to_owned(), "dns-api-token".to_owned())],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_same_content_is_idempotent() {
        let dns = MockDnsProvider::new("example.dev");

        dns.find_or_create_a_record("z1", "server_abc.example.dev", "203.0.113.1")
            .await
            .expect("create");
        dns.find_or_create_a_record("z1", "server_abc.example.dev", "203.0.113.1")
            .await
            .expect("same content should succeed");
    }

    #[tokio::test]
    async fn different_content_fails() {
        let dns = MockDnsProvider::new("example.dev");

        dns.find_or_create_a_record("z1", "server_abc.example.dev", "203.0.113.1")
            .await
            .expect("create");
        let result = dns
            .find_or_create_a_record("z1", "server_abc.example.dev", "203.0.113.2")
            .await;
        assert!(matches!(result, Err(ProviderError::Rejected(_))));
    }
}
