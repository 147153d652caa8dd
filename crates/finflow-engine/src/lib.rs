//! Fan-out/fan-in research workflow engine.
//!
//! A user query is decomposed into sub-queries, routed through parallel
//! source branches (generic search, SEC filings, news, market data), each
//! branch fans out over a per-entity list, optionally runs a cross-document
//! comparison, and everything converges into one synthesis stage.
//!
//! The engine only manages dependency, ordering, concurrency, aggregation,
//! and failure: every unit of real work lives behind the collaborator
//! traits in `finflow-core`.

pub mod aggregate;
pub mod branch;
pub mod fanout;
pub mod flow;
pub mod graph;
pub mod retry;
pub mod synthesis;

pub use aggregate::CorpusAggregator;
pub use branch::BranchController;
pub use fanout::{EntityArtifact, EntityFanoutRunner, EntityTask};
pub use flow::{FinancialFlow, FlowExecutors, RetrievalTask};
pub use graph::{FlowContext, Stage, StageGraph, StageOutput};
pub use retry::RetryingInvoker;
pub use synthesis::ReportSynthesizer;
