//! Control service binary.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use metal_cell::{
    FakeClusterClient, FakeClusterConnector, MockMaintenanceApi, Provisioner, ProvisionerConfig,
    TalosCellProvider,
};
use metal_providers::{
    CellProviderRegistry, MockDnsProvider, MockPaymentProvider, MockServerProvider,
};
use metal_queue::MemoryQueue;
use metal_store::{CellType, MemoryStore};

use metal_control::{ControlConfig, EnvironmentTag, Providers};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("metal_control=info".parse()?),
        )
        .init();

    let config = ControlConfig::load()?;
    info!(
        listen_addr = %config.server.listen_addr,
        environment = ?config.environment,
        "metal control service starting"
    );

    match config.environment {
        EnvironmentTag::Local => run_local(config).await,
        // Vendor, DNS, and payment adapters are wired per deployment; the
        // core ships only their consumption contracts.
        EnvironmentTag::Staging | EnvironmentTag::Production => {
            Err("no provider adapters configured for this environment".into())
        }
    }
}

/// Local development: in-memory backends and mock providers end to end.
async fn run_local(config: ControlConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());

    let dns = Arc::new(MockDnsProvider::new(config.dns.domain.clone()));
    let maintenance = Arc::new(MockMaintenanceApi::with_default_disks());
    let cluster = Arc::new(FakeClusterClient::new());
    let connector = Arc::new(FakeClusterConnector::new(cluster));

    let provisioner = Provisioner::new(
        dns.clone(),
        maintenance.clone(),
        connector.clone(),
        ProvisionerConfig {
            dns_api_token: config.dns.api_token.clone(),
            scratch_root: Some(config.temp_dir.clone()),
            ..ProvisionerConfig::default()
        },
    );
    let talos_cells = Arc::new(TalosCellProvider::new(
        store.clone(),
        dns.clone(),
        connector,
        provisioner,
        config.dns.api_token.clone(),
    ));
    let registry = Arc::new(CellProviderRegistry::new().with(CellType::Talos, talos_cells));

    let providers = Providers {
        vendor: Arc::new(MockServerProvider::new()),
        talos: Arc::new(NoopTalosInstall),
        payments: Arc::new(MockPaymentProvider::new()),
        maintenance,
        registry,
    };

    metal_control::run_with(config, providers, store, queue).await?;
    Ok(())
}

/// Local stand-in for the OS installer.
struct NoopTalosInstall;

#[async_trait::async_trait]
impl metal_providers::TalosProvider for NoopTalosInstall {
    async fn install(
        &self,
        _creds: &metal_providers::ServerCreds,
        opts: &metal_providers::InstallOptions,
    ) -> metal_providers::ProviderResult<()> {
        opts.validate()
    }
}
