//! Service wiring: store, queue, providers, workers, and the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use metal_cell::MaintenanceApi;
use metal_providers::{CellProviderRegistry, PaymentProvider, ServerProvider, TalosProvider};
use metal_queue::{DurableQueue, PostgresQueue, Worker};
use metal_store::{PostgresStore, Store};

use crate::api::{self, AppState};
use crate::config::ControlConfig;
use crate::handlers::{
    BillingHandler, DeployHandler, FulfillmentHandler, JanitorHandler, RescueCredentials,
};

/// The external collaborators the service drives. Concrete adapters are
/// assembled by the binary; the core only sees the capability traits.
pub struct Providers {
    pub vendor: Arc<dyn ServerProvider>,
    pub talos: Arc<dyn TalosProvider>,
    pub payments: Arc<dyn PaymentProvider>,
    pub maintenance: Arc<dyn MaintenanceApi>,
    pub registry: Arc<CellProviderRegistry>,
}

/// Run the control service until interrupted.
///
/// One consumer per queue plus the HTTP API. On interrupt the HTTP server
/// drains briefly, queue consumers stop before their next read, and
/// in-flight handlers run to their deadline.
pub async fn run(config: ControlConfig, providers: Providers) -> Result<(), ServiceError> {
    let store = Arc::new(PostgresStore::new(&config.database.url()).await?);
    let queue = Arc::new(PostgresQueue::from_pool(store.pool().clone()).await?);
    run_with(config, providers, store, queue).await
}

/// Like [`run`], but over caller-supplied backends. Local development uses
/// the in-memory pair.
pub async fn run_with(
    config: ControlConfig,
    providers: Providers,
    store: Arc<dyn Store>,
    queue: Arc<dyn DurableQueue>,
) -> Result<(), ServiceError> {
    let shutdown = CancellationToken::new();

    let mut workers = tokio::task::JoinSet::new();

    {
        let handler = FulfillmentHandler::new(
            store.clone(),
            queue.clone(),
            providers.vendor.clone(),
            providers.talos.clone(),
            providers.payments.clone(),
            providers.maintenance.clone(),
            providers.registry.clone(),
            RescueCredentials {
                username: config.ssh.username.clone(),
                ssh_key_base64: config.ssh.key_base64.clone(),
                ssh_key_password: config.ssh.key_password.clone(),
                ssh_key_fingerprint: config.ssh.key_fingerprint.clone(),
            },
        );
        let worker = Worker::new(
            queue.clone(),
            Duration::from_secs(config.queue.fulfillment_visibility_secs),
            shutdown.clone(),
        );
        workers.spawn(async move { worker.run(handler).await });
    }

    {
        let handler = DeployHandler::new(store.clone(), providers.registry.clone());
        let worker = Worker::new(
            queue.clone(),
            Duration::from_secs(config.queue.deploy_visibility_secs),
            shutdown.clone(),
        );
        workers.spawn(async move { worker.run(handler).await });
    }

    {
        let handler = BillingHandler::new(
            store.clone(),
            providers.payments.clone(),
            providers.vendor.slug(),
        );
        let worker = Worker::new(
            queue.clone(),
            Duration::from_secs(config.queue.billing_visibility_secs),
            shutdown.clone(),
        );
        workers.spawn(async move { worker.run(handler).await });
    }

    {
        let handler = JanitorHandler::new(store.clone(), providers.registry.clone());
        let worker = Worker::new(
            queue.clone(),
            Duration::from_secs(config.queue.janitor_visibility_secs),
            shutdown.clone(),
        );
        workers.spawn(async move { worker.run(handler).await });
    }

    let router = api::router(AppState {
        store,
        temp_root: config.temp_dir.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    info!(addr = %config.server.listen_addr, "control service listening");

    let http_shutdown = shutdown.clone();
    let drain = Duration::from_secs(config.server.drain_timeout_secs);
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        http_shutdown.cancelled().await;
    });

    let interrupt = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for interrupt");
        }
        info!("interrupt received; shutting down");
        interrupt.cancel();
    });

    server.await?;

    // HTTP is drained; give the workers their window to observe the token.
    let _ = tokio::time::timeout(drain, async {
        while workers.join_next().await.is_some() {}
    })
    .await;
    workers.shutdown().await;

    info!("control service stopped");
    Ok(())
}

/// Errors that can stop the service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] metal_store::StoreError),

    #[error(transparent)]
    Queue(#[from] metal_queue::QueueError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
