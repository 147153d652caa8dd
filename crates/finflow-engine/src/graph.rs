use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use finflow_core::error::{FlowError, Result};
use finflow_core::event::{EventBus, FlowEvent};
use finflow_core::types::{BranchResult, EntityInput, SubQueryPlan};

/// What a stage hands to its successors.
///
/// `Skipped` records a stage that was never invoked, which is distinct
/// from a branch that ran and returned a disabled result; both collapse
/// to an empty artifact contribution at the join.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Plan(SubQueryPlan),
    Entities(Vec<EntityInput>),
    Branch(BranchResult),
    Report(PathBuf),
    Skipped,
}

/// Completed stage outputs, keyed by stage id.
///
/// The scheduler is the sole writer; stages read predecessor outputs from
/// here instead of mutating shared accumulators.
#[derive(Debug, Default)]
pub struct FlowContext {
    outputs: RwLock<HashMap<String, StageOutput>>,
}

impl FlowContext {
    pub async fn output(&self, stage_id: &str) -> Option<StageOutput> {
        self.outputs.read().await.get(stage_id).cloned()
    }

    async fn record(&self, stage_id: String, output: StageOutput) {
        self.outputs.write().await.insert(stage_id, output);
    }
}

/// A node in the stage graph. Stages are independent units of work wired
/// together by explicit predecessor sets.
pub trait Stage: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn run(&self, ctx: Arc<FlowContext>) -> BoxFuture<'_, Result<StageOutput>>;
}

struct StageNode {
    stage: Arc<dyn Stage>,
    deps: Vec<String>,
    /// Static precondition: when false the stage is recorded as Skipped
    /// without being invoked.
    run_if: bool,
    /// When this predecessor completed as Skipped, skip this stage too.
    skip_with: Option<String>,
}

/// Explicit DAG scheduler with a counting barrier per node.
///
/// Root stages start concurrently; a dependent stage starts only once
/// every declared predecessor has recorded completion (success or
/// skipped). A join node is simply a stage whose predecessor set holds
/// all its inputs: the counting barrier makes it a logical AND.
///
/// There is no mid-flight cancellation: once a stage starts it runs to
/// completion. A stage failure is terminal: no successor is started and
/// the error names the originating stage.
pub struct StageGraph {
    nodes: Vec<StageNode>,
    bus: Option<Arc<EventBus>>,
    /// Gate requests naming a stage id no node carries; rejected by
    /// `validate` so a typo'd gate cannot silently run the stage it was
    /// meant to skip.
    unknown_gates: Vec<String>,
}

impl StageGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            bus: None,
            unknown_gates: Vec::new(),
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Register a stage with its predecessor set. Root stages pass an
    /// empty set.
    pub fn add(&mut self, stage: Arc<dyn Stage>, deps: &[&str]) {
        self.nodes.push(StageNode {
            stage,
            deps: deps.iter().map(|d| d.to_string()).collect(),
            run_if: true,
            skip_with: None,
        });
    }

    /// Skip the stage (record `Skipped` without invoking it) unless
    /// `condition` holds. Evaluated once, before execution.
    pub fn skip_unless(&mut self, stage_id: &str, condition: bool) {
        match self.nodes.iter_mut().find(|n| n.stage.id() == stage_id) {
            Some(node) => node.run_if = condition,
            None => self.unknown_gates.push(stage_id.to_string()),
        }
    }

    /// Skip the stage when the named predecessor was itself skipped.
    pub fn skip_with(&mut self, stage_id: &str, predecessor: &str) {
        match self.nodes.iter_mut().find(|n| n.stage.id() == stage_id) {
            Some(node) => node.skip_with = Some(predecessor.to_string()),
            None => self.unknown_gates.push(stage_id.to_string()),
        }
    }

    /// Reject malformed graphs before any stage starts: duplicate ids,
    /// unknown predecessors, skip gates outside the predecessor set, and
    /// cycles.
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = self.unknown_gates.first() {
            return Err(FlowError::Graph(format!(
                "skip gate references unknown stage '{}'",
                id
            )));
        }

        let mut ids: Vec<&str> = Vec::new();
        for node in &self.nodes {
            let id = node.stage.id();
            if ids.contains(&id) {
                return Err(FlowError::Graph(format!("duplicate stage id '{}'", id)));
            }
            ids.push(id);
        }

        for node in &self.nodes {
            for dep in &node.deps {
                if !ids.contains(&dep.as_str()) {
                    return Err(FlowError::Graph(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        node.stage.id(),
                        dep
                    )));
                }
            }
            if let Some(gate) = &node.skip_with {
                if !node.deps.contains(gate) {
                    return Err(FlowError::Graph(format!(
                        "stage '{}' skip gate '{}' is not among its predecessors",
                        node.stage.id(),
                        gate
                    )));
                }
            }
        }

        // Kahn's algorithm: if not every stage can be ordered, there is a cycle
        let mut pending: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|n| (n.stage.id(), n.deps.len()))
            .collect();
        let mut queue: VecDeque<&str> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut ordered = 0;
        while let Some(id) = queue.pop_front() {
            ordered += 1;
            for node in &self.nodes {
                if node.deps.iter().any(|d| d == id) {
                    if let Some(count) = pending.get_mut(node.stage.id()) {
                        *count -= 1;
                        if *count == 0 {
                            queue.push_back(node.stage.id());
                        }
                    }
                }
            }
        }
        if ordered != self.nodes.len() {
            return Err(FlowError::Graph("stage graph contains a cycle".into()));
        }

        Ok(())
    }

    fn node(&self, id: &str) -> &StageNode {
        self.nodes
            .iter()
            .find(|n| n.stage.id() == id)
            .expect("validated stage id")
    }

    fn publish(&self, event: FlowEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }

    /// Run the graph to completion and return the recorded outputs.
    pub async fn run(&self) -> Result<Arc<FlowContext>> {
        self.validate()?;

        let ctx = Arc::new(FlowContext::default());
        let total = self.nodes.len();
        let mut completed = 0usize;

        let mut pending: HashMap<String, usize> = self
            .nodes
            .iter()
            .map(|n| (n.stage.id().to_string(), n.deps.len()))
            .collect();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for node in &self.nodes {
            for dep in &node.deps {
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(node.stage.id().to_string());
            }
        }

        let mut ready: VecDeque<String> = self
            .nodes
            .iter()
            .filter(|n| n.deps.is_empty())
            .map(|n| n.stage.id().to_string())
            .collect();

        let mut join_set: JoinSet<(String, Result<StageOutput>, u64)> = JoinSet::new();

        while completed < total {
            // Launch every ready stage; skips cascade synchronously
            while let Some(id) = ready.pop_front() {
                let node = self.node(&id);

                let gate_skipped = match &node.skip_with {
                    Some(pred) => matches!(ctx.output(pred).await, Some(StageOutput::Skipped)),
                    None => false,
                };
                if !node.run_if || gate_skipped {
                    info!(stage = %id, "Stage skipped");
                    self.publish(FlowEvent::StageSkipped { stage: id.clone() });
                    ctx.record(id.clone(), StageOutput::Skipped).await;
                    completed += 1;
                    for dependent in dependents.get(&id).into_iter().flatten() {
                        if let Some(count) = pending.get_mut(dependent) {
                            *count -= 1;
                            if *count == 0 {
                                ready.push_back(dependent.clone());
                            }
                        }
                    }
                    continue;
                }

                debug!(stage = %id, "Stage started");
                self.publish(FlowEvent::StageStarted { stage: id.clone() });

                let stage = node.stage.clone();
                let stage_ctx = ctx.clone();
                join_set.spawn(async move {
                    let start = Instant::now();
                    let output = stage.run(stage_ctx).await;
                    (
                        stage.id().to_string(),
                        output,
                        start.elapsed().as_millis() as u64,
                    )
                });
            }

            if completed >= total {
                break;
            }

            let joined = match join_set.join_next().await {
                Some(joined) => joined,
                None => {
                    return Err(FlowError::Graph(
                        "stage graph stalled with unfinished stages".into(),
                    ));
                }
            };
            let (id, result, elapsed_ms) =
                joined.map_err(|e| FlowError::Graph(format!("stage task panicked: {}", e)))?;

            match result {
                Ok(output) => {
                    info!(stage = %id, elapsed_ms, "Stage complete");
                    self.publish(FlowEvent::StageCompleted {
                        stage: id.clone(),
                        elapsed_ms,
                    });
                    ctx.record(id.clone(), output).await;
                    completed += 1;
                    for dependent in dependents.get(&id).into_iter().flatten() {
                        if let Some(count) = pending.get_mut(dependent) {
                            *count -= 1;
                            if *count == 0 {
                                ready.push_back(dependent.clone());
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(stage = %id, error = %e, "Stage failed, terminating flow");
                    self.publish(FlowEvent::StageFailed {
                        stage: id.clone(),
                        error: e.to_string(),
                    });
                    // In-flight siblings run to completion; their outputs
                    // are discarded. No successor is started.
                    join_set.detach_all();
                    return Err(FlowError::stage(id, e));
                }
            }
        }

        Ok(ctx)
    }
}

impl Default for StageGraph {
    fn default() -> Self {
        Self::new()
    }
}
