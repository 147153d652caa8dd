use tracing::{debug, info};

use finflow_core::error::Result;
use finflow_core::types::{BranchName, BranchResult, EntityInput};

use crate::aggregate::CorpusAggregator;
use crate::fanout::{EntityFanoutRunner, EntityTask};

/// Owns one source branch's lifecycle: decide whether the branch runs,
/// fan out over entities, aggregate, return the artifact handles.
///
/// A disabled branch short-circuits to a well-formed empty result, so the
/// downstream join treats "disabled" and "ran with zero results"
/// identically.
pub struct BranchController {
    fanout: EntityFanoutRunner,
    aggregator: CorpusAggregator,
}

impl BranchController {
    pub fn new(fanout: EntityFanoutRunner, aggregator: CorpusAggregator) -> Self {
        Self { fanout, aggregator }
    }

    pub async fn execute(
        &self,
        enabled: bool,
        entities: &[EntityInput],
        task: &dyn EntityTask,
        branch: BranchName,
        is_comparison: bool,
    ) -> Result<BranchResult> {
        if !enabled {
            debug!(branch = %branch, "Branch disabled");
            return Ok(BranchResult::disabled());
        }

        info!(branch = %branch, entities = entities.len(), "Branch started");
        let items = self.fanout.run(branch, entities, task).await;
        let (artifacts, _corpus) = self.aggregator.aggregate(branch, &items, is_comparison).await?;

        info!(branch = %branch, artifacts = artifacts.len(), "Branch complete");
        Ok(BranchResult::completed(artifacts))
    }
}
