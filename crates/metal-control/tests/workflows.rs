//! End-to-end workflow tests over the in-memory store and queue.
//!
//! A real worker loop consumes the messages; only the external providers
//! are mocked. Scripts are arranged so each workflow completes without
//! waiting out a requeue period.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use metal_cell::MockMaintenanceApi;
use metal_control::handlers::{BillingHandler, FulfillmentHandler, RescueCredentials};
use metal_control::messages::{FulfillmentMessage, HourlyBillingMessage};
use metal_providers::{
    CellProviderRegistry, CheckoutStatus, InstallOptions, MockCellProvider,
    MockPaymentProvider, MockServerProvider, ProviderResult, ProviderServer,
    ProviderServerStatus, ServerCreds, TalosProvider, Transaction, TransactionStatus,
};
use metal_queue::{produce, DurableQueue, Handler, MemoryQueue, QueueMessage, Worker};
use metal_store::{CellType, MemoryStore, ServerStatus, ServerStore, TeamStore, UserStore};

struct NoopInstall;

#[async_trait::async_trait]
impl TalosProvider for NoopInstall {
    async fn install(&self, _creds: &ServerCreds, opts: &InstallOptions) -> ProviderResult<()> {
        opts.validate()
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    queue: Arc<MemoryQueue>,
    payments: Arc<MockPaymentProvider>,
    cells: Arc<MockCellProvider>,
    fulfillment: FulfillmentHandler,
    billing: BillingHandler,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let vendor = Arc::new(MockServerProvider::new());
    let payments = Arc::new(MockPaymentProvider::new());
    let cells = Arc::new(MockCellProvider::new());
    let registry = Arc::new(CellProviderRegistry::new().with(CellType::Talos, cells.clone()));

    // One-pass happy path: payment settled, machine allocated and running
    // on the first poll.
    payments.script_session("cs_1", CheckoutStatus::Paid);
    vendor.script_transactions([Transaction {
        id: "tx-mock-1".to_owned(),
        status: TransactionStatus::Completed,
        server_id: Some("sv-9".to_owned()),
    }]);
    vendor.script_servers([ProviderServer {
        status: ProviderServerStatus::Running,
        ipv4: Some("203.0.113.9".to_owned()),
        ipv6: None,
    }]);

    let fulfillment = FulfillmentHandler::new(
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
    let billing = BillingHandler::new(store.clone(), payments.clone(), "mockvendor");

    Fixture {
        store,
        queue,
        payments,
        cells,
        fulfillment,
        billing,
    }
}

async fn seed_fulfillment(fixture: &Fixture) -> FulfillmentMessage {
    let user = fixture
        .store
        .create_user("buyer@example.com", "pw-pw-pw-pw")
        .await
        .expect("user");
    let team = fixture
        .store
        .create_team("acme", &user.id)
        .await
        .expect("team");
    fixture
        .store
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

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fulfillment_through_the_worker_loop() {
    let fixture = fixture();
    let message = seed_fulfillment(&fixture).await;
    let team_id = message.team_id.clone();

    produce(fixture.queue.as_ref(), &message)
        .await
        .expect("produce");

    let shutdown = CancellationToken::new();
    let worker = Worker::new(
        fixture.queue.clone(),
        Duration::from_secs(60),
        shutdown.clone(),
    );
    let handler = fixture.fulfillment;
    let run = tokio::spawn(async move { worker.run(handler).await });

    // Wait for the workflow to complete.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let archived = fixture
            .queue
            .archived_count(FulfillmentMessage::QUEUE)
            .await;
        if archived >= 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "fulfillment did not complete in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    shutdown.cancel();
    run.await.expect("worker task");

    // One server, running, attached to a fresh default cell.
    let servers = fixture
        .store
        .servers_for_team(&team_id)
        .await
        .expect("servers");
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0].status, ServerStatus::Running);
    assert_eq!(servers[0].provider_slug.as_deref(), Some("mockvendor"));
    assert_eq!(servers[0].public_ipv4.as_deref(), Some("203.0.113.9"));
    assert_eq!(fixture.cells.created_cells(), vec!["default"]);

    // Exactly one billing message on the billing queue.
    assert_eq!(
        fixture
            .queue
            .pending_count(HourlyBillingMessage::QUEUE)
            .await,
        1
    );
}

#[tokio::test]
async fn billing_message_meters_exactly_once_per_hour() {
    let fixture = fixture();
    let message = seed_fulfillment(&fixture).await;

    // Run fulfillment directly to produce the billing message.
    let outcome = fixture
        .fulfillment
        .handle(message)
        .await
        .expect("fulfillment");
    assert!(matches!(outcome, metal_queue::Outcome::Done));

    let envelope = fixture
        .queue
        .read(HourlyBillingMessage::QUEUE, Duration::from_secs(30))
        .await
        .expect("read")
        .expect("billing message");
    let billing_message: HourlyBillingMessage =
        serde_json::from_value(envelope.body).expect("decode");
    assert_eq!(billing_message.stripe_customer_id, "cus_42");

    // First handling sends the hour-zero event; a second handling in the
    // same hour is acknowledged as a duplicate.
    fixture
        .billing
        .handle(billing_message.clone())
        .await
        .expect("first billing run");
    fixture
        .billing
        .handle(billing_message)
        .await
        .expect("second billing run");

    let events = fixture.payments.events();
    assert_eq!(events.len(), 1, "one meter event left the system");
    assert_eq!(events[0].value, 0);
    assert_eq!(events[0].customer_id, "cus_42");
}
