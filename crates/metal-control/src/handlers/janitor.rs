//! Cell janitor handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use metal_providers::CellProviderRegistry;
use metal_queue::{Handler, HandlerError, Outcome};
use metal_store::Store;

use crate::messages::{JanitorMessage, JANITOR_PERIOD};

/// Periodic health and reconciliation pass over one cell.
pub struct JanitorHandler {
    store: Arc<dyn Store>,
    registry: Arc<CellProviderRegistry>,
}

impl JanitorHandler {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, registry: Arc<CellProviderRegistry>) -> Self {
        Self { store, registry }
    }
}

#[async_trait]
impl Handler<JanitorMessage> for JanitorHandler {
    async fn handle(
        &self,
        message: JanitorMessage,
    ) -> Result<Outcome<JanitorMessage>, HandlerError> {
        let cell = self.store.cell_by_id(&message.cell_id).await?;
        let provider = self.registry.for_type(cell.cell_type)?;

        if let Err(e) = provider.janitor(&message.cell_id).await {
            warn!(cell_id = %message.cell_id, error = %e, "janitor pass failed");
            return Err(e.into());
        }

        debug!(cell_id = %message.cell_id, "janitor pass complete");
        Ok(Outcome::requeue(message, JANITOR_PERIOD))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metal_providers::MockCellProvider;
    use metal_store::{test_fixtures, CellStore, CellType, MemoryStore};
    use metal_core::TypedId;

    #[tokio::test]
    async fn janitor_routes_by_type_and_requeues() {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MockCellProvider::new());
        let registry =
            Arc::new(CellProviderRegistry::new().with(CellType::Talos, provider.clone()));
        let handler = JanitorHandler::new(store.clone(), registry);

        let cell = test_fixtures::cell(&metal_core::TeamId::generate(), &[]);
        store.create_cell(&cell).await.expect("cell");

        let outcome = handler
            .handle(JanitorMessage {
                cell_id: cell.id.clone(),
            })
            .await
            .expect("run");
        assert!(matches!(outcome, Outcome::Requeue { delay, .. } if delay == JANITOR_PERIOD));
        assert_eq!(provider.janitor_calls(), 1);
    }

    #[tokio::test]
    async fn missing_cell_is_a_soft_failure() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(CellProviderRegistry::new());
        let handler = JanitorHandler::new(store, registry);

        let result = handler
            .handle(JanitorMessage {
                cell_id: metal_core::CellId::generate(),
            })
            .await;
        assert!(result.is_err());
    }
}
