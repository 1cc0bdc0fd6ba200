//! Deployment reconciliation handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use metal_providers::CellProviderRegistry;
use metal_queue::{Handler, HandlerError, Outcome};
use metal_store::{DeploymentStatus, Store};

use crate::messages::{DeployMessage, DEPLOY_PERIOD};

/// Reason persisted when a deployment targets no cells.
pub const NO_CELLS_REASON: &str = "no cells associated with deployment";

/// Advances one deployment per message by talking to its cell.
pub struct DeployHandler {
    store: Arc<dyn Store>,
    registry: Arc<CellProviderRegistry>,
}

impl DeployHandler {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, registry: Arc<CellProviderRegistry>) -> Self {
        Self { store, registry }
    }
}

#[async_trait]
impl Handler<DeployMessage> for DeployHandler {
    async fn handle(
        &self,
        message: DeployMessage,
    ) -> Result<Outcome<DeployMessage>, HandlerError> {
        let deployment = self
            .store
            .deployment_by_key(&message.app_id, &message.env_id, message.deployment_seq)
            .await?;

        // Terminal states never reopen; a redelivered message for a finished
        // deployment simply archives.
        if deployment.status.is_terminal() {
            return Ok(Outcome::Done);
        }

        let Some(cell_id) = deployment.cell_ids.first() else {
            self.store
                .update_deployment_status(
                    &message.app_id,
                    &message.env_id,
                    message.deployment_seq,
                    DeploymentStatus::Failed,
                    NO_CELLS_REASON,
                )
                .await?;
            return Ok(Outcome::fatal(NO_CELLS_REASON));
        };

        let cell = self.store.cell_by_id(cell_id).await?;
        let provider = self.registry.for_type(cell.cell_type)?;

        let result = match provider.advance_deployment(cell_id, &deployment).await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    app_id = %message.app_id,
                    env_id = %message.env_id,
                    seq = message.deployment_seq,
                    error = %e,
                    "deployment advance failed"
                );
                self.store
                    .update_deployment_status(
                        &message.app_id,
                        &message.env_id,
                        message.deployment_seq,
                        DeploymentStatus::Failed,
                        &e.to_string(),
                    )
                    .await?;
                return Err(e.into());
            }
        };

        self.store
            .update_deployment_status(
                &message.app_id,
                &message.env_id,
                message.deployment_seq,
                result.status,
                &result.reason,
            )
            .await?;

        info!(
            app_id = %message.app_id,
            env_id = %message.env_id,
            seq = message.deployment_seq,
            status = %result.status,
            "deployment advanced"
        );

        if result.status == DeploymentStatus::Deploying {
            Ok(Outcome::requeue(message, DEPLOY_PERIOD))
        } else {
            Ok(Outcome::Done)
        }
    }
}
