//! Payment processor interface.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};

/// Status of a checkout session at the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    Open,
    Paid,
    NoPaymentRequired,
}

impl CheckoutStatus {
    /// Whether this status confirms payment.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Paid | Self::NoPaymentRequired)
    }
}

/// A checkout session as reported by the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub status: CheckoutStatus,
}

/// A usage record posted to the processor, deduplicated by `identifier`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterEvent {
    pub event_name: String,
    /// Units of usage (hours, for servers).
    pub value: u64,
    /// Caller-supplied idempotency key; at most one event per key leaves
    /// the system.
    pub identifier: String,
    /// Customer the usage belongs to.
    pub customer_id: String,
}

/// The payment processor.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a billing account (customer) for the email if one does not
    /// already exist; returns its external id either way.
    async fn ensure_billing_account(&self, email: &str) -> ProviderResult<String>;

    /// Fetch a checkout session by id.
    async fn checkout_session(&self, id: &str) -> ProviderResult<CheckoutSession>;

    /// Mark a stored payment method as the customer's default.
    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> ProviderResult<()>;

    /// Post a meter event. Fails with
    /// [`ProviderError::MeterEventAlreadyExists`] when an event with the
    /// same identifier was already recorded.
    async fn post_meter_event(&self, event: &MeterEvent) -> ProviderResult<()>;
}

/// Mock payment processor.
#[derive(Debug, Default)]
pub struct MockPaymentProvider {
    customers: Mutex<HashMap<String, String>>,
    sessions: Mutex<HashMap<String, CheckoutStatus>>,
    events: Mutex<HashMap<String, MeterEvent>>,
    defaults: Mutex<HashMap<String, String>>,
}

impl MockPaymentProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a checkout session with the given status.
    pub fn script_session(&self, id: impl Into<String>, status: CheckoutStatus) {
        self.sessions
            .lock()
            .expect("lock poisoned")
            .insert(id.into(), status);
    }

    /// Meter events accepted so far, in identifier order.
    #[must_use]
    pub fn events(&self) -> Vec<MeterEvent> {
        let events = self.events.lock().expect("lock poisoned");
        let mut all: Vec<_> = events.values().cloned().collect();
        all.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        all
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn ensure_billing_account(&self, email: &str) -> ProviderResult<String> {
        let mut customers = self.customers.lock().expect("lock poisoned");
        let id = customers
            .entry(email.to_owned())
            .or_insert_with(|| format!("cus_{}", customers.len() + 1));
        Ok(id.clone())
    }

    async fn checkout_session(&self, id: &str) -> ProviderResult<CheckoutSession> {
        let sessions = self.sessions.lock().expect("lock poisoned");
        sessions
            .get(id)
            .map(|status| CheckoutSession {
                id: id.to_owned(),
                status: *status,
            })
            .ok_or_else(|| ProviderError::NotFound(format!("checkout session {id}")))
    }

    async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> ProviderResult<()> {
        self.defaults
            .lock()
            .expect("lock poisoned")
            .insert(customer_id.to_owned(), payment_method_id.to_owned());
        Ok(())
    }

    async fn post_meter_event(&self, event: &MeterEvent) -> ProviderResult<()> {
        let mut events = self.events.lock().expect("lock poisoned");
        if events.contains_key(&event.identifier) {
            return Err(ProviderError::MeterEventAlreadyExists);
        }
        events.insert(event.identifier.clone(), event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_billing_account_is_idempotent() {
        let payments = MockPaymentProvider::new();
        let first = payments
            .ensure_billing_account("dev@example.com")
            .await
            .expect("first");
        let second = payments
            .ensure_billing_account("dev@example.com")
            .await
            .expect("second");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn duplicate_meter_event_is_distinguishable() {
        let payments = MockPaymentProvider::new();
        let event = MeterEvent {
            event_name: "mockvendor-ax102-hel1-usage-hour".to_owned(),
            value: 1,
            identifier: "server_abc-1700000000".to_owned(),
            customer_id: "cus_1".to_owned(),
        };

        payments.post_meter_event(&event).await.expect("first post");
        let second = payments.post_meter_event(&event).await;
        assert!(matches!(
            second,
            Err(ProviderError::MeterEventAlreadyExists)
        ));
        assert_eq!(payments.events().len(), 1);
    }
}
