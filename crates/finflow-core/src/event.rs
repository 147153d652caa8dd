use crate::types::BranchName;

/// Flow event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum FlowEvent {
    /// A stage was started by the scheduler.
    StageStarted { stage: String },
    /// A stage completed.
    StageCompleted { stage: String, elapsed_ms: u64 },
    /// A stage was skipped without being invoked.
    StageSkipped { stage: String },
    /// A stage failed; the flow terminates.
    StageFailed { stage: String, error: String },
    /// One entity's retrieval finished inside a branch.
    EntityCompleted { branch: BranchName, ticker: String },
    /// One entity failed and was skipped; the branch continues.
    EntityFailed { branch: BranchName, ticker: String, error: String },
    /// An executor call failed and will be retried.
    RetryAttempt { task: String, attempt: u32, error: String },
    /// A cross-document comparison was triggered for a branch.
    ComparisonTriggered { branch: BranchName, entity_count: usize },
    /// The final report is ready.
    ReportReady { path: std::path::PathBuf },
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<FlowEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: FlowEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<FlowEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
