use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use finflow_core::error::Result;
use finflow_core::event::{EventBus, FlowEvent};
use finflow_core::types::{ArtifactHandle, BranchName, EntityInput};

/// One unit of per-entity work inside a branch.
///
/// A task typically issues one or more retried executor calls, writes the
/// resulting document to the artifact store, and returns its handle.
pub trait EntityTask: Send + Sync + 'static {
    fn run(&self, entity: EntityInput) -> BoxFuture<'_, Result<ArtifactHandle>>;
}

/// An artifact paired with the entity that produced it. The aggregator
/// needs the entity metadata for corpus title lines.
#[derive(Debug, Clone)]
pub struct EntityArtifact {
    pub entity: EntityInput,
    pub handle: ArtifactHandle,
}

/// Runs a per-entity task once for every entity in a branch.
///
/// Entities run concurrently, but the returned list always reflects
/// entity input order, never completion order. A failing entity is logged
/// and skipped; it never aborts the remaining entities.
pub struct EntityFanoutRunner {
    bus: Option<Arc<EventBus>>,
}

impl EntityFanoutRunner {
    pub fn new() -> Self {
        Self { bus: None }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub async fn run(
        &self,
        branch: BranchName,
        entities: &[EntityInput],
        task: &dyn EntityTask,
    ) -> Vec<EntityArtifact> {
        let futs: Vec<_> = entities
            .iter()
            .map(|entity| task.run(entity.clone()))
            .collect();

        // join_all resolves in input order regardless of completion order
        let results = futures::future::join_all(futs).await;

        let mut artifacts = Vec::new();
        for (entity, result) in entities.iter().zip(results) {
            match result {
                Ok(handle) => {
                    debug!(branch = %branch, ticker = %entity.ticker, "Entity retrieval complete");
                    if let Some(bus) = &self.bus {
                        bus.publish(FlowEvent::EntityCompleted {
                            branch,
                            ticker: entity.ticker.clone(),
                        });
                    }
                    artifacts.push(EntityArtifact {
                        entity: entity.clone(),
                        handle,
                    });
                }
                Err(e) => {
                    warn!(
                        branch = %branch,
                        ticker = %entity.ticker,
                        error = %e,
                        "Entity retrieval failed, skipping entity"
                    );
                    if let Some(bus) = &self.bus {
                        bus.publish(FlowEvent::EntityFailed {
                            branch,
                            ticker: entity.ticker.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        artifacts
    }
}

impl Default for EntityFanoutRunner {
    fn default() -> Self {
        Self::new()
    }
}
