//! Hourly billing handler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use metal_providers::{MeterEvent, PaymentProvider, ProviderError};
use metal_queue::{Handler, HandlerError, Outcome};
use metal_store::{HourlyBillingState, Store};

use crate::messages::{HourlyBillingMessage, BILLING_PERIOD};

const SECONDS_PER_HOUR: i64 = 3600;

/// Emits one usage meter event per server per wall-clock hour.
///
/// The idempotency identifier pins the event to the hour it was emitted in,
/// so a redelivered message or a racing worker produces a duplicate the
/// processor acknowledges instead of a double charge.
pub struct BillingHandler {
    store: Arc<dyn Store>,
    payments: Arc<dyn PaymentProvider>,
    vendor_slug: String,
}

impl BillingHandler {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        payments: Arc<dyn PaymentProvider>,
        vendor_slug: impl Into<String>,
    ) -> Self {
        Self {
            store,
            payments,
            vendor_slug: vendor_slug.into(),
        }
    }

    /// `{vendor}-{offering}-{location}-usage-hour`, lowercased.
    fn event_name(&self, message: &HourlyBillingMessage) -> String {
        format!(
            "{}-{}-{}-usage-hour",
            self.vendor_slug, message.offering_id, message.location
        )
        .to_lowercase()
    }
}

#[async_trait]
impl Handler<HourlyBillingMessage> for BillingHandler {
    async fn handle(
        &self,
        message: HourlyBillingMessage,
    ) -> Result<Outcome<HourlyBillingMessage>, HandlerError> {
        let event_name = self.event_name(&message);
        let server = self.store.server_by_id(&message.server_id).await?;

        let now = Utc::now();
        let base = server
            .billing
            .last_event_sent_at
            .unwrap_or(server.created_at);
        let hours_to_bill =
            u64::try_from(((now - base).num_seconds() / SECONDS_PER_HOUR).max(0)).unwrap_or(0);

        let hour_floor = (now.timestamp() / SECONDS_PER_HOUR) * SECONDS_PER_HOUR;
        let identifier = format!("{}-{hour_floor}", message.server_id);

        let event = MeterEvent {
            event_name: event_name.clone(),
            value: hours_to_bill,
            identifier,
            customer_id: message.stripe_customer_id.clone(),
        };

        match self.payments.post_meter_event(&event).await {
            Ok(()) => {
                info!(
                    server_id = %message.server_id,
                    event = %event_name,
                    hours = hours_to_bill,
                    "meter event sent"
                );
            }
            Err(ProviderError::MeterEventAlreadyExists) => {
                debug!(
                    server_id = %message.server_id,
                    identifier = %event.identifier,
                    "meter event already recorded this hour"
                );
            }
            Err(e) => return Err(e.into()),
        }

        self.store
            .update_server_billing_state(
                &message.server_id,
                &HourlyBillingState {
                    last_event_sent_at: Some(now),
                    event_name,
                },
            )
            .await?;

        Ok(Outcome::requeue(message, BILLING_PERIOD))
    }
}
