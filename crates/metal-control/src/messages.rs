//! Queue message types for the control loops.
//!
//! The fulfillment message doubles as its own progress record: each step
//! writes its flag into the message before the requeue, so a worker picking
//! up the successor resumes exactly where the last one stopped. The flags
//! are a write-once ladder; a stale redelivery re-runs completed steps,
//! which all re-read the store first and converge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use metal_core::{AppId, CellId, EnvId, OfferingId, ServerId, TeamId, UserId};
use metal_queue::QueueMessage;

/// How often the deployment reconciler retries an in-flight deployment.
pub const DEPLOY_PERIOD: Duration = Duration::from_secs(5);

/// How often the fulfillment loop re-polls a pending step.
pub const FULFILLMENT_PERIOD: Duration = Duration::from_secs(30);

/// How often a server's usage hour is metered.
pub const BILLING_PERIOD: Duration = Duration::from_secs(60 * 60);

/// How often each cell is janitored.
pub const JANITOR_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Drives one deployment toward a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployMessage {
    pub app_id: AppId,
    pub env_id: EnvId,
    pub deployment_seq: i64,
}

impl QueueMessage for DeployMessage {
    const QUEUE: &'static str = "deployments";
}

/// Drives one server purchase from intent to cell membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentMessage {
    pub team_id: TeamId,
    pub user_id: UserId,
    pub offering_id: OfferingId,
    pub location: String,
    pub checkout_session_id: String,
    /// Cell to attach to; `default` when unset.
    pub cell_name: Option<String>,
    pub dns_zone_id: String,

    // Step flags, written once each as the workflow advances.
    #[serde(default)]
    pub step_server_id: Option<ServerId>,
    #[serde(default)]
    pub step_payment_received: bool,
    #[serde(default)]
    pub step_provider_transaction_id: Option<String>,
    #[serde(default)]
    pub step_provider_server_id: Option<String>,
    #[serde(default)]
    pub step_server_online: bool,
    #[serde(default)]
    pub step_server_installed: bool,
    #[serde(default)]
    pub step_talos_online: bool,
    #[serde(default)]
    pub step_server_added_to_cell: bool,
}

impl FulfillmentMessage {
    /// A fresh purchase-intent message with no steps completed.
    #[must_use]
    pub fn new(
        team_id: TeamId,
        user_id: UserId,
        offering_id: OfferingId,
        location: impl Into<String>,
        checkout_session_id: impl Into<String>,
        dns_zone_id: impl Into<String>,
    ) -> Self {
        Self {
            team_id,
            user_id,
            offering_id,
            location: location.into(),
            checkout_session_id: checkout_session_id.into(),
            cell_name: None,
            dns_zone_id: dns_zone_id.into(),
            step_server_id: None,
            step_payment_received: false,
            step_provider_transaction_id: None,
            step_provider_server_id: None,
            step_server_online: false,
            step_server_installed: false,
            step_talos_online: false,
            step_server_added_to_cell: false,
        }
    }
}

impl QueueMessage for FulfillmentMessage {
    const QUEUE: &'static str = "fulfillments";
}

/// Emits one usage meter event per server per hour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyBillingMessage {
    pub team_id: TeamId,
    pub offering_id: OfferingId,
    pub location: String,
    pub stripe_customer_id: String,
    pub server_id: ServerId,
}

impl QueueMessage for HourlyBillingMessage {
    const QUEUE: &'static str = "hourly-billing";
}

/// Periodic health pass over one cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanitorMessage {
    pub cell_id: CellId,
}

impl QueueMessage for JanitorMessage {
    const QUEUE: &'static str = "cell-janitor";
}

#[cfg(test)]
mod tests {
    use super::*;
    use metal_core::TypedId;

    #[test]
    fn fulfillment_flags_default_to_unset_on_old_snapshots() {
        // A message serialized before a flag existed must still decode.
        let old = serde_json::json!({
            "team_id": TeamId::generate(),
            "user_id": UserId::generate(),
            "offering_id": "offering_ax102",
            "location": "HEL1",
            "checkout_session_id": "cs_1",
            "cell_name": null,
            "dns_zone_id": "z",
        });
        let message: FulfillmentMessage = serde_json::from_value(old).expect("decode");
        assert!(message.step_server_id.is_none());
        assert!(!message.step_payment_received);
        assert!(!message.step_server_added_to_cell);
    }
}
