use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The user's free-text research request. Immutable once a flow starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Query(pub String);

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output of the query-decomposition stage.
///
/// `is_comparison` is set once at decomposition time and read by every
/// downstream branch; it is never re-evaluated mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQueryPlan {
    pub queries: Vec<String>,
    pub is_comparison: bool,
}

impl SubQueryPlan {
    /// The trivial plan substituted when no entity source is requested:
    /// the original query as the single sub-query, no comparison.
    pub fn single(query: &Query) -> Self {
        Self {
            queries: vec![query.0.clone()],
            is_comparison: false,
        }
    }

    /// Sub-queries joined into one long query for information extraction.
    pub fn joined(&self) -> String {
        self.queries.join(".")
    }
}

/// One company/ticker/time-window unit produced by information extraction.
///
/// Never mutated after creation; each branch consumes it independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityInput {
    pub company: String,
    pub ticker: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// The originating sub-query text for this entity.
    pub query: String,
}

/// The source branch that produced an artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BranchName {
    GenericSearch,
    SecFilings,
    YfinanceNews,
    YfinanceStocks,
}

impl BranchName {
    /// All branches in declaration order. The global report list is
    /// assembled in this order.
    pub const ALL: [BranchName; 4] = [
        BranchName::GenericSearch,
        BranchName::SecFilings,
        BranchName::YfinanceNews,
        BranchName::YfinanceStocks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BranchName::GenericSearch => "generic_search",
            BranchName::SecFilings => "sec_filings",
            BranchName::YfinanceNews => "yfinance_news",
            BranchName::YfinanceStocks => "yfinance_stocks",
        }
    }
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who an artifact belongs to: a single entity, or the whole branch
/// (the generic research report, or a cross-entity comparison document).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ArtifactOwner {
    Entity(String),
    Global,
}

/// Reference to one retrieval result document in the artifact store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ArtifactHandle {
    pub path: PathBuf,
    pub branch: BranchName,
    pub owner: ArtifactOwner,
}

impl ArtifactHandle {
    pub fn entity(path: impl Into<PathBuf>, branch: BranchName, ticker: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            branch,
            owner: ArtifactOwner::Entity(ticker.into()),
        }
    }

    pub fn global(path: impl Into<PathBuf>, branch: BranchName) -> Self {
        Self {
            path: path.into(),
            branch,
            owner: ArtifactOwner::Global,
        }
    }
}

/// Result of one branch's full lifecycle.
///
/// A disabled branch and a branch that ran with zero surviving entities
/// both produce an empty artifact list; the join treats them identically.
#[derive(Debug, Clone, Default)]
pub struct BranchResult {
    pub enabled: bool,
    pub artifacts: Vec<ArtifactHandle>,
}

impl BranchResult {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            artifacts: vec![],
        }
    }

    pub fn completed(artifacts: Vec<ArtifactHandle>) -> Self {
        Self {
            enabled: true,
            artifacts,
        }
    }
}

/// Structured input for an external task executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInput {
    /// What kind of work this is (e.g. "decomposition", "comparison").
    pub task: String,
    pub payload: serde_json::Value,
}

impl TaskInput {
    pub fn new(task: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task: task.into(),
            payload,
        }
    }
}

/// Structured output from an external task executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOutput {
    pub text: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            payload: serde_json::Value::Null,
        }
    }
}

/// Result of a retried executor invocation.
///
/// Retry exhaustion produces a degraded outcome (`succeeded == false`,
/// `output.text` carrying the last error) rather than an error, so that
/// fan-out over many entities cannot be aborted by one exhaustion.
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub output: TaskOutput,
    pub succeeded: bool,
    pub last_error: Option<String>,
}

/// Per-artifact summary produced by the synthesis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub headline: String,
    pub summary: String,
}
