use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use finflow_core::error::Result;
use finflow_core::event::{EventBus, FlowEvent};
use finflow_core::traits::{ArtifactStore, TaskExecutor};
use finflow_core::types::{ArtifactHandle, BranchName, EntityInput, TaskInput};

use crate::fanout::EntityArtifact;
use crate::retry::RetryingInvoker;

const CORPUS_START: &str = "<start>---\n";
const CORPUS_END: &str = "\n<end>---\n\n";

/// Concatenates a branch's per-entity artifacts into one delimited corpus
/// and conditionally runs a cross-document comparison over it.
///
/// The comparison fires iff more than one artifact exists and the query
/// asked for a comparison. The corpus file is rebuilt from scratch on
/// every call: any stale corpus from a previous run is removed first, so
/// re-aggregating the same artifact set produces byte-identical content.
pub struct CorpusAggregator {
    store: Arc<dyn ArtifactStore>,
    comparison: Arc<dyn TaskExecutor>,
    invoker: RetryingInvoker,
    cache_dir: PathBuf,
    comparison_query: String,
    bus: Option<Arc<EventBus>>,
}

impl CorpusAggregator {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        comparison: Arc<dyn TaskExecutor>,
        invoker: RetryingInvoker,
        cache_dir: impl Into<PathBuf>,
        comparison_query: impl Into<String>,
    ) -> Self {
        Self {
            store,
            comparison,
            invoker,
            cache_dir: cache_dir.into(),
            comparison_query: comparison_query.into(),
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Path of the corpus file for a branch. One branch, one corpus file;
    /// no two branches share one.
    pub fn corpus_path(&self, branch: BranchName) -> PathBuf {
        self.cache_dir.join(format!("comparison_{}.txt", branch))
    }

    fn analysis_path(&self, branch: BranchName) -> PathBuf {
        self.cache_dir
            .join(format!("comparison_{}_analysis.txt", branch))
    }

    /// Aggregate a branch's artifacts.
    ///
    /// Returns the artifact handles in entity order, with the comparison
    /// artifact appended when a comparison ran, plus the corpus handle if
    /// one was written.
    pub async fn aggregate(
        &self,
        branch: BranchName,
        items: &[EntityArtifact],
        is_comparison: bool,
    ) -> Result<(Vec<ArtifactHandle>, Option<ArtifactHandle>)> {
        let mut artifacts: Vec<ArtifactHandle> =
            items.iter().map(|item| item.handle.clone()).collect();

        if items.len() <= 1 || !is_comparison {
            return Ok((artifacts, None));
        }

        let corpus_path = self.corpus_path(branch);
        // Drop any stale corpus from a previous run before appending
        self.store.remove(&corpus_path).await?;

        // Per-entity corpus I/O failures leave the entity out of the
        // corpus; they never fail the branch
        let mut appended = 0usize;
        for item in items {
            let content = match self.store.read_to_string(&item.handle.path).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(
                        branch = %branch,
                        path = %item.handle.path.display(),
                        error = %e,
                        "Artifact unreadable, leaving it out of the corpus"
                    );
                    self.publish_entity_failed(branch, &item.entity.ticker, &e);
                    continue;
                }
            };

            let mut block = String::from(CORPUS_START);
            block.push_str(&title_line(branch, &item.entity));
            block.push_str(&content);
            block.push_str(CORPUS_END);
            if let Err(e) = self.store.append(&corpus_path, &block).await {
                warn!(
                    branch = %branch,
                    path = %item.handle.path.display(),
                    error = %e,
                    "Corpus append failed, leaving the artifact out of the corpus"
                );
                self.publish_entity_failed(branch, &item.entity.ticker, &e);
                continue;
            }
            appended += 1;
        }

        if appended == 0 {
            warn!(branch = %branch, "No corpus blocks written, skipping comparison");
            return Ok((artifacts, None));
        }

        info!(branch = %branch, entities = items.len(), "Running cross-document comparison");
        if let Some(bus) = &self.bus {
            bus.publish(FlowEvent::ComparisonTriggered {
                branch,
                entity_count: items.len(),
            });
        }

        let context = self.store.read_to_string(&corpus_path).await?;
        let outcome = self
            .invoker
            .invoke(
                &*self.comparison,
                TaskInput::new(
                    "comparison",
                    serde_json::json!({
                        "context": context,
                        "query": self.comparison_query,
                    }),
                ),
            )
            .await;

        // A degraded outcome still yields a present artifact
        let analysis_path = self.analysis_path(branch);
        self.store.write(&analysis_path, &outcome.output.text).await?;
        artifacts.push(ArtifactHandle::global(analysis_path, branch));

        Ok((artifacts, Some(ArtifactHandle::global(corpus_path, branch))))
    }

    fn publish_entity_failed(
        &self,
        branch: BranchName,
        ticker: &str,
        error: &finflow_core::error::FlowError,
    ) {
        if let Some(bus) = &self.bus {
            bus.publish(FlowEvent::EntityFailed {
                branch,
                ticker: ticker.to_string(),
                error: error.to_string(),
            });
        }
    }
}

/// Title line for one corpus block. SEC filings carry the time-period
/// label; the other branches identify the company only.
fn title_line(branch: BranchName, entity: &EntityInput) -> String {
    match branch {
        BranchName::SecFilings => format!(
            "Context for the company {} and period {} to {}.\n",
            entity.company, entity.start_date, entity.end_date
        ),
        _ => format!("{}\n", entity.company),
    }
}
