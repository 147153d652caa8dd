use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use finflow_core::config::{FlowConfig, SourceFlags, WorkflowRequest};
use finflow_core::error::{FlowError, Result};
use finflow_core::event::EventBus;
use finflow_core::traits::{ArtifactStore, ReportRenderer, TaskExecutor};
use finflow_core::types::{
    ArtifactHandle, BranchName, BranchResult, EntityInput, Query, SubQueryPlan, TaskInput,
};

use crate::aggregate::CorpusAggregator;
use crate::branch::BranchController;
use crate::fanout::{EntityFanoutRunner, EntityTask};
use crate::graph::{FlowContext, Stage, StageGraph, StageOutput};
use crate::retry::RetryingInvoker;
use crate::synthesis::ReportSynthesizer;

pub const STAGE_GENERIC_RESEARCH: &str = "generic_research";
pub const STAGE_QUERY_DECOMPOSITION: &str = "query_decomposition";
pub const STAGE_INFORMATION_EXTRACTION: &str = "information_extraction";
pub const STAGE_SEC_EDGAR: &str = "sec_edgar";
pub const STAGE_YFINANCE_NEWS: &str = "yfinance_news";
pub const STAGE_YFINANCE_STOCKS: &str = "yfinance_stocks";
pub const STAGE_REPORT_SYNTHESIS: &str = "report_synthesis";

fn branch_stage_id(branch: BranchName) -> &'static str {
    match branch {
        BranchName::GenericSearch => STAGE_GENERIC_RESEARCH,
        BranchName::SecFilings => STAGE_SEC_EDGAR,
        BranchName::YfinanceNews => STAGE_YFINANCE_NEWS,
        BranchName::YfinanceStocks => STAGE_YFINANCE_STOCKS,
    }
}

/// The external task executors a flow run is wired to, one per role.
#[derive(Clone)]
pub struct FlowExecutors {
    pub generic_research: Arc<dyn TaskExecutor>,
    pub decomposition: Arc<dyn TaskExecutor>,
    pub extraction: Arc<dyn TaskExecutor>,
    pub sec_filings: Arc<dyn TaskExecutor>,
    pub yfinance_news: Arc<dyn TaskExecutor>,
    pub yfinance_stocks: Arc<dyn TaskExecutor>,
    /// Optional second pass refining each entity artifact against its
    /// originating sub-query.
    pub refine: Option<Arc<dyn TaskExecutor>>,
    pub comparison: Arc<dyn TaskExecutor>,
    pub section: Arc<dyn TaskExecutor>,
    pub summary: Arc<dyn TaskExecutor>,
}

/// Per-entity retrieval: one retried executor call, an optional refine
/// pass, and a durable artifact write.
pub struct RetrievalTask {
    branch: BranchName,
    executor: Arc<dyn TaskExecutor>,
    refine: Option<Arc<dyn TaskExecutor>>,
    store: Arc<dyn ArtifactStore>,
    invoker: RetryingInvoker,
    cache_dir: PathBuf,
}

impl RetrievalTask {
    pub fn new(
        branch: BranchName,
        executor: Arc<dyn TaskExecutor>,
        refine: Option<Arc<dyn TaskExecutor>>,
        store: Arc<dyn ArtifactStore>,
        invoker: RetryingInvoker,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            branch,
            executor,
            refine,
            store,
            invoker,
            cache_dir: cache_dir.into(),
        }
    }
}

impl EntityTask for RetrievalTask {
    fn run(&self, entity: EntityInput) -> BoxFuture<'_, Result<ArtifactHandle>> {
        Box::pin(async move {
            let input = TaskInput::new(
                format!("{}_retrieval", self.branch),
                serde_json::to_value(&entity)?,
            );
            let outcome = self.invoker.invoke(&*self.executor, input).await;

            // A degraded outcome is still written: exhaustion degrades the
            // artifact, it does not drop the entity
            let path = self
                .cache_dir
                .join(format!("{}_{}.txt", self.branch, entity.ticker));
            self.store.write(&path, &outcome.output.text).await?;

            if let Some(refine) = &self.refine {
                let content = self.store.read_to_string(&path).await?;
                let refined = self
                    .invoker
                    .invoke(
                        &**refine,
                        TaskInput::new(
                            "refine",
                            serde_json::json!({
                                "query": entity.query,
                                "document": content,
                            }),
                        ),
                    )
                    .await;
                if refined.succeeded {
                    self.store.write(&path, &refined.output.text).await?;
                } else {
                    warn!(
                        branch = %self.branch,
                        ticker = %entity.ticker,
                        "Refine pass exhausted retries, keeping raw retrieval"
                    );
                }
            }

            Ok(ArtifactHandle::entity(path, self.branch, entity.ticker))
        })
    }
}

struct GenericResearchStage {
    enabled: bool,
    query: Query,
    executor: Arc<dyn TaskExecutor>,
    store: Arc<dyn ArtifactStore>,
    invoker: RetryingInvoker,
    report_path: PathBuf,
}

impl Stage for GenericResearchStage {
    fn id(&self) -> &str {
        STAGE_GENERIC_RESEARCH
    }

    fn run(&self, _ctx: Arc<FlowContext>) -> BoxFuture<'_, Result<StageOutput>> {
        Box::pin(async move {
            if !self.enabled {
                return Ok(StageOutput::Branch(BranchResult::disabled()));
            }

            let outcome = self
                .invoker
                .invoke(
                    &*self.executor,
                    TaskInput::new(
                        "generic_research",
                        serde_json::json!({ "query": self.query.as_str() }),
                    ),
                )
                .await;
            self.store
                .write(&self.report_path, &outcome.output.text)
                .await?;

            let handle =
                ArtifactHandle::global(self.report_path.clone(), BranchName::GenericSearch);
            Ok(StageOutput::Branch(BranchResult::completed(vec![handle])))
        })
    }
}

struct QueryDecompositionStage {
    query: Query,
    sources: SourceFlags,
    executor: Arc<dyn TaskExecutor>,
    invoker: RetryingInvoker,
}

impl Stage for QueryDecompositionStage {
    fn id(&self) -> &str {
        STAGE_QUERY_DECOMPOSITION
    }

    fn run(&self, _ctx: Arc<FlowContext>) -> BoxFuture<'_, Result<StageOutput>> {
        Box::pin(async move {
            if !self.sources.any_entity_source() {
                // No entity source requested: substitute the trivial
                // single-sub-query, non-comparison plan
                return Ok(StageOutput::Plan(SubQueryPlan::single(&self.query)));
            }

            let outcome = self
                .invoker
                .invoke(
                    &*self.executor,
                    TaskInput::new(
                        "decomposition",
                        serde_json::json!({ "query": self.query.as_str() }),
                    ),
                )
                .await;
            if !outcome.succeeded {
                return Err(FlowError::Task(
                    outcome.last_error.unwrap_or_else(|| "decomposition failed".into()),
                ));
            }

            let plan: SubQueryPlan = serde_json::from_value(outcome.output.payload)?;
            info!(
                sub_queries = plan.queries.len(),
                is_comparison = plan.is_comparison,
                "Query decomposed"
            );
            Ok(StageOutput::Plan(plan))
        })
    }
}

struct InformationExtractionStage {
    executor: Arc<dyn TaskExecutor>,
    invoker: RetryingInvoker,
}

impl Stage for InformationExtractionStage {
    fn id(&self) -> &str {
        STAGE_INFORMATION_EXTRACTION
    }

    fn run(&self, ctx: Arc<FlowContext>) -> BoxFuture<'_, Result<StageOutput>> {
        Box::pin(async move {
            let plan = read_plan(&ctx).await?;

            let outcome = self
                .invoker
                .invoke(
                    &*self.executor,
                    TaskInput::new(
                        "extraction",
                        serde_json::json!({ "query": plan.joined() }),
                    ),
                )
                .await;
            if !outcome.succeeded {
                return Err(FlowError::Task(
                    outcome.last_error.unwrap_or_else(|| "extraction failed".into()),
                ));
            }

            let payload = outcome.output.payload;
            let entities: Vec<EntityInput> = if payload.is_array() {
                serde_json::from_value(payload)?
            } else {
                serde_json::from_value(payload["entities"].clone())?
            };
            info!(entities = entities.len(), "Entities extracted");
            Ok(StageOutput::Entities(entities))
        })
    }
}

struct SourceBranchStage {
    branch: BranchName,
    enabled: bool,
    controller: BranchController,
    task: RetrievalTask,
}

impl Stage for SourceBranchStage {
    fn id(&self) -> &str {
        branch_stage_id(self.branch)
    }

    fn run(&self, ctx: Arc<FlowContext>) -> BoxFuture<'_, Result<StageOutput>> {
        Box::pin(async move {
            let plan = read_plan(&ctx).await?;
            let entities = match ctx.output(STAGE_INFORMATION_EXTRACTION).await {
                Some(StageOutput::Entities(entities)) => entities,
                other => {
                    return Err(FlowError::Graph(format!(
                        "branch '{}' expected extracted entities, got {:?}",
                        self.branch, other
                    )));
                }
            };

            let result = self
                .controller
                .execute(
                    self.enabled,
                    &entities,
                    &self.task,
                    self.branch,
                    plan.is_comparison,
                )
                .await?;
            Ok(StageOutput::Branch(result))
        })
    }
}

struct ReportSynthesisStage {
    query: Query,
    synthesizer: ReportSynthesizer,
}

impl Stage for ReportSynthesisStage {
    fn id(&self) -> &str {
        STAGE_REPORT_SYNTHESIS
    }

    fn run(&self, ctx: Arc<FlowContext>) -> BoxFuture<'_, Result<StageOutput>> {
        Box::pin(async move {
            // The global report list: branch contributions in declaration
            // order, each block internally in entity order. Skipped and
            // disabled branches contribute nothing.
            let mut report_list: Vec<ArtifactHandle> = Vec::new();
            for branch in BranchName::ALL {
                match ctx.output(branch_stage_id(branch)).await {
                    Some(StageOutput::Branch(result)) => report_list.extend(result.artifacts),
                    Some(StageOutput::Skipped) | None => {}
                    other => {
                        return Err(FlowError::Graph(format!(
                            "synthesis expected a branch result from '{}', got {:?}",
                            branch, other
                        )));
                    }
                }
            }

            let report = self.synthesizer.synthesize(&self.query, &report_list).await?;
            Ok(StageOutput::Report(report))
        })
    }
}

async fn read_plan(ctx: &FlowContext) -> Result<SubQueryPlan> {
    match ctx.output(STAGE_QUERY_DECOMPOSITION).await {
        Some(StageOutput::Plan(plan)) => Ok(plan),
        other => Err(FlowError::Graph(format!(
            "expected a sub-query plan from '{}', got {:?}",
            STAGE_QUERY_DECOMPOSITION, other
        ))),
    }
}

/// The financial research flow: two independent roots, a three-way branch
/// fan-out behind information extraction, and a four-way join into report
/// synthesis.
///
/// ```text
/// generic_research ──────────────────────────────┐
/// query_decomposition → information_extraction   │
///     ├── sec_edgar ─────────────────────────────┤
///     ├── yfinance_news ──────────────────────────┤
///     └── yfinance_stocks ────────────────────────┴→ report_synthesis
/// ```
pub struct FinancialFlow {
    config: FlowConfig,
    executors: FlowExecutors,
    store: Arc<dyn ArtifactStore>,
    renderer: Arc<dyn ReportRenderer>,
    bus: Arc<EventBus>,
}

impl FinancialFlow {
    pub fn new(
        config: FlowConfig,
        executors: FlowExecutors,
        store: Arc<dyn ArtifactStore>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> Self {
        Self {
            config,
            executors,
            store,
            renderer,
            bus: Arc::new(EventBus::default()),
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    /// The event bus this flow publishes to. Subscribe before `run`.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    fn invoker(&self) -> RetryingInvoker {
        RetryingInvoker::new(self.config.retry.clone()).with_bus(self.bus.clone())
    }

    fn branch_stage(
        &self,
        branch: BranchName,
        enabled: bool,
        executor: Arc<dyn TaskExecutor>,
    ) -> Arc<SourceBranchStage> {
        let cache = &self.config.cache_dir;
        let aggregator = CorpusAggregator::new(
            self.store.clone(),
            self.executors.comparison.clone(),
            self.invoker(),
            cache,
            self.config.comparison_query.clone(),
        )
        .with_bus(self.bus.clone());
        let fanout = EntityFanoutRunner::new().with_bus(self.bus.clone());
        let task = RetrievalTask::new(
            branch,
            executor,
            self.executors.refine.clone(),
            self.store.clone(),
            self.invoker(),
            cache,
        );
        Arc::new(SourceBranchStage {
            branch,
            enabled,
            controller: BranchController::new(fanout, aggregator),
            task,
        })
    }

    /// Run the flow for one request. Returns the final report handle, or
    /// the first stage failure.
    pub async fn run(&self, request: WorkflowRequest) -> Result<PathBuf> {
        self.config.validate()?;
        request.validate()?;

        let run_id = uuid::Uuid::new_v4();
        info!(run_id = %run_id, query = %request.query, "Starting flow run");

        // Cache is created fresh; stale artifacts from a previous run
        // would otherwise leak into corpus files
        self.store.clear_dir(&self.config.cache_dir).await?;

        let sources = request.sources;
        let query = request.query;
        let cache = &self.config.cache_dir;

        let mut graph = StageGraph::new().with_bus(self.bus.clone());

        graph.add(
            Arc::new(GenericResearchStage {
                enabled: sources.generic_search,
                query: query.clone(),
                executor: self.executors.generic_research.clone(),
                store: self.store.clone(),
                invoker: self.invoker(),
                report_path: cache.join("report_generic_search.txt"),
            }),
            &[],
        );
        graph.add(
            Arc::new(QueryDecompositionStage {
                query: query.clone(),
                sources,
                executor: self.executors.decomposition.clone(),
                invoker: self.invoker(),
            }),
            &[],
        );
        graph.add(
            Arc::new(InformationExtractionStage {
                executor: self.executors.extraction.clone(),
                invoker: self.invoker(),
            }),
            &[STAGE_QUERY_DECOMPOSITION],
        );
        graph.add(
            self.branch_stage(
                BranchName::SecFilings,
                sources.sec_filings,
                self.executors.sec_filings.clone(),
            ),
            &[STAGE_INFORMATION_EXTRACTION],
        );
        graph.add(
            self.branch_stage(
                BranchName::YfinanceNews,
                sources.yfinance_news,
                self.executors.yfinance_news.clone(),
            ),
            &[STAGE_INFORMATION_EXTRACTION],
        );
        graph.add(
            self.branch_stage(
                BranchName::YfinanceStocks,
                sources.yfinance_stocks,
                self.executors.yfinance_stocks.clone(),
            ),
            &[STAGE_INFORMATION_EXTRACTION],
        );
        graph.add(
            Arc::new(ReportSynthesisStage {
                query: query.clone(),
                synthesizer: ReportSynthesizer::new(
                    self.store.clone(),
                    self.renderer.clone(),
                    self.executors.section.clone(),
                    self.executors.summary.clone(),
                    self.invoker(),
                    cache,
                )
                .with_bus(self.bus.clone()),
            }),
            &[
                STAGE_GENERIC_RESEARCH,
                STAGE_SEC_EDGAR,
                STAGE_YFINANCE_NEWS,
                STAGE_YFINANCE_STOCKS,
            ],
        );

        // With no entity source requested, extraction never runs and the
        // three branches are skipped outright rather than disabled
        graph.skip_unless(STAGE_INFORMATION_EXTRACTION, sources.any_entity_source());
        graph.skip_with(STAGE_SEC_EDGAR, STAGE_INFORMATION_EXTRACTION);
        graph.skip_with(STAGE_YFINANCE_NEWS, STAGE_INFORMATION_EXTRACTION);
        graph.skip_with(STAGE_YFINANCE_STOCKS, STAGE_INFORMATION_EXTRACTION);

        let ctx = graph.run().await?;

        match ctx.output(STAGE_REPORT_SYNTHESIS).await {
            Some(StageOutput::Report(path)) => {
                info!(run_id = %run_id, report = %path.display(), "Flow run complete");
                Ok(path)
            }
            other => Err(FlowError::Graph(format!(
                "flow finished without a report, got {:?}",
                other
            ))),
        }
    }
}
