//! Server fulfillment handler.
//!
//! Walks a purchase intent through payment confirmation, the vendor order,
//! OS install, and cell attachment. Progress lives twice: as step flags in
//! the requeued message, and as row state in the store. Either copy alone
//! is enough to converge, so a stale redelivery is harmless.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use metal_cell::MaintenanceApi;
use metal_core::{ServerId, TypedId};
use metal_providers::{
    CellProviderRegistry, CreateCellRequest, InstallOptions, Order, PaymentProvider,
    ProviderServerStatus, ServerCreds, ServerProvider, TalosProvider,
};
use metal_queue::{produce, produce_delayed, DurableQueue, Handler, HandlerError, Outcome};
use metal_store::{
    CellType, HourlyBillingState, Server, ServerStatus, Store,
};

use crate::messages::{
    FulfillmentMessage, HourlyBillingMessage, JanitorMessage, FULFILLMENT_PERIOD, JANITOR_PERIOD,
};

/// OS version installed on every new server.
const INSTALL_VERSION: &str = "1.7.6";
const INSTALL_ARCH: &str = "amd64";

/// Deadline on the maintenance API liveness probe.
const MAINTENANCE_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Reason used when a server would need to join an already-bootstrapped
/// cluster. Multi-node join is future work.
pub const JOIN_EXISTING_CELL_REASON: &str = "TODO: add server to existing talos cluster";

/// SSH credential template for reaching vendor rescue environments; the
/// per-server IP is filled in at install time.
#[derive(Debug, Clone)]
pub struct RescueCredentials {
    pub username: String,
    pub ssh_key_base64: String,
    pub ssh_key_password: String,
    pub ssh_key_fingerprint: String,
}

impl RescueCredentials {
    fn for_ip(&self, ip: &str) -> ServerCreds {
        ServerCreds {
            ip: ip.to_owned(),
            username: self.username.clone(),
            ssh_key_base64: self.ssh_key_base64.clone(),
            ssh_key_password: self.ssh_key_password.clone(),
            ssh_key_fingerprint: self.ssh_key_fingerprint.clone(),
        }
    }
}

/// Drives one server purchase from intent to cell membership.
pub struct FulfillmentHandler {
    store: Arc<dyn Store>,
    queue: Arc<dyn DurableQueue>,
    vendor: Arc<dyn ServerProvider>,
    talos: Arc<dyn TalosProvider>,
    payments: Arc<dyn PaymentProvider>,
    maintenance: Arc<dyn MaintenanceApi>,
    registry: Arc<CellProviderRegistry>,
    rescue_creds: RescueCredentials,
}

impl FulfillmentHandler {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        queue: Arc<dyn DurableQueue>,
        vendor: Arc<dyn ServerProvider>,
        talos: Arc<dyn TalosProvider>,
        payments: Arc<dyn PaymentProvider>,
        maintenance: Arc<dyn MaintenanceApi>,
        registry: Arc<CellProviderRegistry>,
        rescue_creds: RescueCredentials,
    ) -> Self {
        Self {
            store,
            queue,
            vendor,
            talos,
            payments,
            maintenance,
            registry,
            rescue_creds,
        }
    }

    async fn ensure_server_row(&self, message: &mut FulfillmentMessage) -> Result<ServerId, HandlerError> {
        if let Some(id) = &message.step_server_id {
            return Ok(id.clone());
        }
        let now = Utc::now();
        let server = Server {
            id: ServerId::generate(),
            team_id: message.team_id.clone(),
            offering_id: message.offering_id.clone(),
            location: message.location.clone(),
            status: if message.step_payment_received {
                ServerStatus::PendingProvider
            } else {
                ServerStatus::PendingPayment
            },
            provider_slug: None,
            provider_id: None,
            public_ipv4: None,
            cell_id: None,
            billing: HourlyBillingState::default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.store.create_server(&server).await?;
        info!(server_id = %server.id, team_id = %message.team_id, "server row created");
        message.step_server_id = Some(server.id.clone());
        Ok(server.id)
    }
}

#[async_trait]
impl Handler<FulfillmentMessage> for FulfillmentHandler {
    async fn handle(
        &self,
        mut message: FulfillmentMessage,
    ) -> Result<Outcome<FulfillmentMessage>, HandlerError> {
        // 1. Server row.
        let server_id = self.ensure_server_row(&mut message).await?;

        // 2. Payment confirmation.
        if !message.step_payment_received {
            let session = self
                .payments
                .checkout_session(&message.checkout_session_id)
                .await?;
            if !session.status.is_settled() {
                info!(server_id = %server_id, "checkout not settled yet");
                return Ok(Outcome::requeue(message, FULFILLMENT_PERIOD));
            }
            self.store
                .update_server_status(&server_id, ServerStatus::PendingProvider)
                .await?;
            message.step_payment_received = true;
        }

        // 3. Vendor order.
        if message.step_provider_transaction_id.is_none() {
            let transaction = self
                .vendor
                .order(&Order {
                    offering_id: message.offering_id.clone(),
                    location_id: message.location.clone(),
                    addons: Vec::new(),
                })
                .await?;
            info!(server_id = %server_id, transaction_id = %transaction.id, "order placed");
            message.step_provider_transaction_id = Some(transaction.id);
        }

        // 4. Resolve the vendor's server id from the transaction.
        if message.step_provider_server_id.is_none() {
            let transaction_id = message
                .step_provider_transaction_id
                .clone()
                .unwrap_or_default();
            let transaction = self.vendor.get_transaction(&transaction_id).await?;
            match transaction.server_id {
                Some(provider_server_id) => {
                    self.store
                        .update_server_provider_id(
                            &server_id,
                            self.vendor.slug(),
                            &provider_server_id,
                        )
                        .await?;
                    message.step_provider_server_id = Some(provider_server_id);
                }
                None => {
                    info!(server_id = %server_id, "vendor has not allocated a machine yet");
                    return Ok(Outcome::requeue(message, FULFILLMENT_PERIOD));
                }
            }
        }

        // 5. Wait for the machine to come online with an address.
        if !message.step_server_online {
            let provider_server_id = message
                .step_provider_server_id
                .clone()
                .unwrap_or_default();
            let machine = self.vendor.get_server(&provider_server_id).await?;
            if let Some(ipv4) = &machine.ipv4 {
                self.store
                    .update_server_public_ipv4(&server_id, ipv4)
                    .await?;
            }
            if machine.ipv4.is_some() && machine.status == ProviderServerStatus::Running {
                message.step_server_online = true;
            } else {
                info!(server_id = %server_id, status = ?machine.status, "machine not online yet");
                return Ok(Outcome::requeue(message, FULFILLMENT_PERIOD));
            }
        }

        let server = self.store.server_by_id(&server_id).await?;
        let ipv4 = server
            .public_ipv4
            .clone()
            .ok_or("server online without a public ipv4")?;

        // 6. OS install.
        if !message.step_server_installed {
            self.talos
                .install(
                    &self.rescue_creds.for_ip(&ipv4),
                    &InstallOptions {
                        version: INSTALL_VERSION.to_owned(),
                        arch: INSTALL_ARCH.to_owned(),
                    },
                )
                .await?;
            info!(server_id = %server_id, "OS installed");
            message.step_server_installed = true;
        }

        // 7. Maintenance API liveness.
        if !message.step_talos_online {
            let probe =
                tokio::time::timeout(MAINTENANCE_PROBE_TIMEOUT, self.maintenance.disks(&ipv4))
                    .await;
            match probe {
                Ok(Ok(_)) => message.step_talos_online = true,
                Ok(Err(e)) => {
                    info!(server_id = %server_id, error = %e, "maintenance API not up yet");
                    return Ok(Outcome::requeue(message, FULFILLMENT_PERIOD));
                }
                Err(_) => {
                    info!(server_id = %server_id, "maintenance API probe timed out");
                    return Ok(Outcome::requeue(message, FULFILLMENT_PERIOD));
                }
            }
        }

        // 8. Attach to a cell.
        if !message.step_server_added_to_cell {
            let team = self.store.team_by_id(&message.team_id).await?;
            let wanted = message.cell_name.as_deref().unwrap_or("default");
            let cells = self.store.cells_for_team(&message.team_id).await?;

            match cells.iter().find(|c| c.name == wanted) {
                Some(cell) if cell.talos.is_some() => {
                    warn!(
                        server_id = %server_id,
                        cell_id = %cell.id,
                        "server needs multi-node join; not implemented"
                    );
                    return Ok(Outcome::fatal(JOIN_EXISTING_CELL_REASON));
                }
                Some(cell) => {
                    // A cell row without credentials should not exist; the
                    // provisioner persists complete cells only.
                    return Ok(Outcome::fatal(format!(
                        "cell {} exists without credentials",
                        cell.id
                    )));
                }
                None => {
                    let provider = self.registry.for_type(CellType::Talos)?;
                    let server = self.store.server_by_id(&server_id).await?;
                    let cell = provider
                        .create_cell(&CreateCellRequest {
                            name: wanted.to_owned(),
                            team_id: team.id.clone(),
                            team_name: team.name.clone(),
                            team_age_private_key: team.age_keypair.private_key.clone(),
                            dns_zone_id: message.dns_zone_id.clone(),
                            first_server: server,
                        })
                        .await?;
                    // New cells enter the janitor rotation.
                    produce_delayed(
                        self.queue.as_ref(),
                        &JanitorMessage { cell_id: cell.id },
                        JANITOR_PERIOD,
                    )
                    .await?;
                }
            }

            self.store
                .update_server_status(&server_id, ServerStatus::Running)
                .await?;
            message.step_server_added_to_cell = true;
        }

        // 9. Hand the server to the hourly billing loop.
        let team = self.store.team_by_id(&message.team_id).await?;
        produce(
            self.queue.as_ref(),
            &HourlyBillingMessage {
                team_id: message.team_id.clone(),
                offering_id: message.offering_id.clone(),
                location: message.location.clone(),
                stripe_customer_id: team.billing_account_id.unwrap_or_default(),
                server_id: server_id.clone(),
            },
        )
        .await?;

        info!(server_id = %server_id, "fulfillment complete");
        Ok(Outcome::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metal_cell::MockMaintenanceApi;
    use metal_providers::{
        CheckoutStatus, MockCellProvider, MockPaymentProvider, MockServerProvider,
        ProviderResult, ProviderServer, Transaction, TransactionStatus,
    };
    use metal_queue::{MemoryQueue, QueueMessage};
    use metal_store::{CellStore, MemoryStore, ServerStore, TeamStore, UserStore};

    /// Install stub that always succeeds.
    struct NoopInstall;

    #[async_trait]
    impl TalosProvider for NoopInstall {
        async fn install(
            &self,
            _creds: &ServerCreds,
            opts: &InstallOptions,
        ) -> ProviderResult<()> {
            opts.validate()
        }
    }

    struct Harness {
        handler: FulfillmentHandler,
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
        vendor: Arc<MockServerProvider>,
        payments: Arc<MockPaymentProvider>,
        cells: Arc<MockCellProvider>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let vendor = Arc::new(MockServerProvider::new());
        let payments = Arc::new(MockPaymentProvider::new());
        let cells = Arc::new(MockCellProvider::new());
        let registry = Arc::new(CellProviderRegistry::new().with(CellType::Talos, cells.clone()));

        let handler = FulfillmentHandler::new(
            store.clone(),
            queue.clone(),
            vendor.clone(),
            Arc::new(NoopInstall),
            payments.clone(),
            Arc::new(MockMaintenanceApi::with_default_disks()),
            registry,
            RescueCredentials {
                username: "root".to_owned(),
                ssh_key_base64: String::new(),
                ssh_key_password: String::new(),
                ssh_key_fingerprint: String::new(),
            },
        );
        Harness {
            handler,
            store,
            queue,
            vendor,
            payments,
            cells,
        }
    }

    async fn seeded_message(h: &Harness) -> FulfillmentMessage {
        let user = h
            .store
            .create_user("buyer@example.com", "pw-pw-pw-pw")
            .await
            .expect("user");
        let team = h.store.create_team("acme", &user.id).await.expect("team");
        h.store
            .set_billing_account(&team.id, "cus_42")
            .await
            .expect("billing account");
        FulfillmentMessage::new(
            team.id,
            user.id,
            metal_core::OfferingId::new("offering_ax102"),
            "HEL1",
            "cs_1",
            "z",
        )
    }

    fn unwrap_requeue(outcome: Outcome<FulfillmentMessage>) -> FulfillmentMessage {
        match outcome {
            Outcome::Requeue { message, .. } => message,
            other => panic!("expected requeue, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn happy_path_over_repeated_deliveries() {
        let h = harness();
        let message = seeded_message(&h).await;
        h.payments.script_session("cs_1", CheckoutStatus::Paid);
        // Vendor: first transaction poll has no machine, second does.
        h.vendor.script_transactions([
            Transaction {
                id: "tx-mock-1".to_owned(),
                status: TransactionStatus::Pending,
                server_id: None,
            },
            Transaction {
                id: "tx-mock-1".to_owned(),
                status: TransactionStatus::Completed,
                server_id: Some("sv-9".to_owned()),
            },
        ]);
        // Machine: address appears on the first poll, running on the second.
        h.vendor.script_servers([
            ProviderServer {
                status: ProviderServerStatus::Pending,
                ipv4: Some("203.0.113.9".to_owned()),
                ipv6: None,
            },
            ProviderServer {
                status: ProviderServerStatus::Running,
                ipv4: Some("203.0.113.9".to_owned()),
                ipv6: None,
            },
        ]);

        // Run 1: creates the row, confirms payment, orders, first
        // transaction poll comes back empty.
        let message = unwrap_requeue(h.handler.handle(message).await.expect("run 1"));
        let server_id = message.step_server_id.clone().expect("server id");
        assert!(message.step_payment_received);
        assert!(message.step_provider_transaction_id.is_some());
        assert!(message.step_provider_server_id.is_none());
        let row = h.store.server_by_id(&server_id).await.expect("row");
        assert_eq!(row.status, ServerStatus::PendingProvider);

        // Run 2: transaction resolves, machine has an address but is not
        // running yet.
        let message = unwrap_requeue(h.handler.handle(message).await.expect("run 2"));
        assert_eq!(message.step_provider_server_id.as_deref(), Some("sv-9"));
        assert!(!message.step_server_online);
        let row = h.store.server_by_id(&server_id).await.expect("row");
        assert_eq!(row.provider_slug.as_deref(), Some("mockvendor"));
        assert_eq!(row.public_ipv4.as_deref(), Some("203.0.113.9"));

        // Run 3: machine is running; install, probe, and cell attachment
        // all complete in the same pass.
        let outcome = h.handler.handle(message).await.expect("run 3");
        assert!(matches!(outcome, Outcome::Done));

        let row = h.store.server_by_id(&server_id).await.expect("row");
        assert_eq!(row.status, ServerStatus::Running);
        assert_eq!(h.cells.created_cells(), vec!["default"]);
        assert_eq!(
            h.queue.pending_count(HourlyBillingMessage::QUEUE).await,
            1,
            "one billing message produced"
        );
    }

    #[tokio::test]
    async fn unpaid_checkout_requeues_without_side_effects() {
        let h = harness();
        let message = seeded_message(&h).await;
        h.payments.script_session("cs_1", CheckoutStatus::Open);

        let requeued = unwrap_requeue(h.handler.handle(message).await.expect("run"));
        assert!(!requeued.step_payment_received);
        let server_id = requeued.step_server_id.expect("server id");
        let row = h.store.server_by_id(&server_id).await.expect("row");
        assert_eq!(row.status, ServerStatus::PendingPayment);
        assert!(h.vendor.orders().is_empty(), "no order before payment");
    }

    #[tokio::test]
    async fn existing_bootstrapped_cell_is_a_fatal_todo() {
        let h = harness();
        let message = seeded_message(&h).await;
        h.payments.script_session("cs_1", CheckoutStatus::Paid);
        h.vendor.script_transactions([Transaction {
            id: "tx-mock-1".to_owned(),
            status: TransactionStatus::Completed,
            server_id: Some("sv-9".to_owned()),
        }]);
        h.vendor.script_servers([ProviderServer {
            status: ProviderServerStatus::Running,
            ipv4: Some("203.0.113.9".to_owned()),
            ipv6: None,
        }]);

        // A default cell with credentials already exists for the team.
        let mut cell = metal_store::test_fixtures::cell(&message.team_id, &[]);
        cell.talos = Some(metal_store::TalosCellData {
            talosconfig: "context: x".to_owned(),
            kubeconfig: "apiVersion: v1".to_owned(),
            config_archive: vec![1],
        });
        h.store.create_cell(&cell).await.expect("cell");

        let outcome = h.handler.handle(message).await.expect("run");
        match outcome {
            Outcome::Fatal { reason } => assert_eq!(reason, JOIN_EXISTING_CELL_REASON),
            other => panic!("expected fatal, got {other:?}"),
        }
        assert!(h.cells.created_cells().is_empty());
    }

    #[tokio::test]
    async fn redelivered_final_message_converges() {
        let h = harness();
        let message = seeded_message(&h).await;
        let team_id = message.team_id.clone();
        h.payments.script_session("cs_1", CheckoutStatus::Paid);
        h.vendor.script_transactions([Transaction {
            id: "tx-mock-1".to_owned(),
            status: TransactionStatus::Completed,
            server_id: Some("sv-9".to_owned()),
        }]);
        h.vendor.script_servers([ProviderServer {
            status: ProviderServerStatus::Running,
            ipv4: Some("203.0.113.9".to_owned()),
            ipv6: None,
        }]);

        let outcome = h.handler.handle(message.clone()).await.expect("first");
        assert!(matches!(outcome, Outcome::Done));

        let servers = h.store.servers_for_team(&team_id).await.expect("servers");
        assert_eq!(servers.len(), 1);

        // The final snapshot of the message is delivered a second time.
        let mut replay = message;
        replay.step_server_id = Some(servers[0].id.clone());
        replay.step_payment_received = true;
        replay.step_provider_transaction_id = Some("tx-mock-1".to_owned());
        replay.step_provider_server_id = Some("sv-9".to_owned());
        replay.step_server_online = true;
        replay.step_server_installed = true;
        replay.step_talos_online = true;
        replay.step_server_added_to_cell = true;

        let outcome = h.handler.handle(replay).await.expect("replay");
        assert!(matches!(outcome, Outcome::Done));

        let servers = h.store.servers_for_team(&team_id).await.expect("servers");
        assert_eq!(servers.len(), 1, "no duplicate server row");
        assert_eq!(h.cells.created_cells().len(), 1, "no duplicate cell");
        assert_eq!(servers[0].status, ServerStatus::Running);
    }
}
