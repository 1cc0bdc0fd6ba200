//! Hardware vendor interface.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use metal_core::OfferingId;

use crate::error::{ProviderError, ProviderResult};

/// Per-location pricing for an offering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferingPrice {
    pub location: String,
    pub setup: f64,
    pub hourly: f64,
    pub monthly: f64,
    pub currency: String,
}

/// A hardware SKU at a vendor, priced per location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offering {
    pub id: OfferingId,
    pub vendor_slug: String,
    pub cpu: String,
    pub memory: String,
    pub disk: String,
    pub bandwidth: String,
    pub prices: Vec<OfferingPrice>,
}

/// An order placed with the vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub offering_id: OfferingId,
    pub location_id: String,
    pub addons: Vec<String>,
}

/// Vendor-side status of a purchase transaction.
///
/// Adapters translate vendor status strings; anything unknown maps to
/// `Pending` so a new vendor state never wedges a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Canceled,
}

impl TransactionStatus {
    /// Translate a vendor status string.
    #[must_use]
    pub fn from_vendor(s: &str) -> Self {
        match s {
            "completed" | "success" | "finished" => Self::Completed,
            "canceled" | "cancelled" | "refunded" => Self::Canceled,
            _ => Self::Pending,
        }
    }
}

/// A vendor-side ticket opened when ordering a server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub status: TransactionStatus,
    /// Set once the vendor has allocated a machine.
    pub server_id: Option<String>,
}

/// Vendor-side status of a provisioned machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderServerStatus {
    Pending,
    Running,
}

impl ProviderServerStatus {
    /// Translate a vendor status string; unknown values map to `Pending`.
    #[must_use]
    pub fn from_vendor(s: &str) -> Self {
        match s {
            "running" | "on" | "active" => Self::Running,
            _ => Self::Pending,
        }
    }
}

/// A machine as reported by the vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderServer {
    pub status: ProviderServerStatus,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
}

/// A hardware vendor.
#[async_trait]
pub trait ServerProvider: Send + Sync {
    /// Stable identifier of this vendor, used in billing event names and on
    /// server rows.
    fn slug(&self) -> &'static str;

    /// The vendor's current hardware catalog.
    async fn current_offerings(&self) -> ProviderResult<Vec<Offering>>;

    /// Place an order. Returns the opened transaction.
    async fn order(&self, order: &Order) -> ProviderResult<Transaction>;

    /// Fetch a transaction by id.
    async fn get_transaction(&self, id: &str) -> ProviderResult<Transaction>;

    /// Fetch a machine by the vendor's server id.
    async fn get_server(&self, provider_server_id: &str) -> ProviderResult<ProviderServer>;
}

/// Mock vendor for tests: `order` opens a transaction and subsequent polls
/// replay scripted responses.
#[derive(Debug, Default)]
pub struct MockServerProvider {
    offerings: Vec<Offering>,
    transactions: Mutex<VecDeque<Transaction>>,
    servers: Mutex<VecDeque<ProviderServer>>,
    orders: Mutex<Vec<Order>>,
}

impl MockServerProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the sequence of responses `get_transaction` will return.
    pub fn script_transactions(&self, transactions: impl IntoIterator<Item = Transaction>) {
        self.transactions
            .lock()
            .expect("lock poisoned")
            .extend(transactions);
    }

    /// Script the sequence of responses `get_server` will return.
    pub fn script_servers(&self, servers: impl IntoIterator<Item = ProviderServer>) {
        self.servers.lock().expect("lock poisoned").extend(servers);
    }

    /// Orders placed so far.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl ServerProvider for MockServerProvider {
    fn slug(&self) -> &'static str {
        "mockvendor"
    }

    async fn current_offerings(&self) -> ProviderResult<Vec<Offering>> {
        Ok(self.offerings.clone())
    }

    async fn order(&self, order: &Order) -> ProviderResult<Transaction> {
        self.orders.lock().expect("lock poisoned").push(order.clone());
        Ok(Transaction {
            id: "tx-mock-1".to_owned(),
            status: TransactionStatus::Pending,
            server_id: None,
        })
    }

    async fn get_transaction(&self, id: &str) -> ProviderResult<Transaction> {
        let mut scripted = self.transactions.lock().expect("lock poisoned");
        scripted
            .pop_front()
            .ok_or_else(|| ProviderError::NotFound(format!("transaction {id}")))
    }

    async fn get_server(&self, provider_server_id: &str) -> ProviderResult<ProviderServer> {
        let mut scripted = self.servers.lock().expect("lock poisoned");
        scripted
            .pop_front()
            .ok_or_else(|| ProviderError::NotFound(format!("server {provider_server_id}")))
    }
}
