use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{ArtifactHandle, Query, SummaryRecord, TaskInput, TaskOutput};

/// External task executor performing one unit of work.
///
/// The engine is agnostic to what the executor actually does (search,
/// filing retrieval, market-data pull, text generation); it only needs
/// success/failure and a result payload.
pub trait TaskExecutor: Send + Sync + 'static {
    fn execute(&self, input: TaskInput) -> BoxFuture<'_, Result<TaskOutput>>;
}

/// Durable key→text store addressed by path-like handles.
///
/// Read misses surface as `FlowError::ArtifactNotFound`; other failures
/// as `FlowError::Io`.
pub trait ArtifactStore: Send + Sync + 'static {
    /// Append text to the document at `path`, creating it if absent.
    fn append(&self, path: &Path, text: &str) -> BoxFuture<'_, Result<()>>;

    /// Overwrite the document at `path` with `text`.
    fn write(&self, path: &Path, text: &str) -> BoxFuture<'_, Result<()>>;

    /// Read the full content of the document at `path`.
    fn read_to_string(&self, path: &Path) -> BoxFuture<'_, Result<String>>;

    /// Remove the document at `path`. Removing an absent document is not
    /// an error.
    fn remove(&self, path: &Path) -> BoxFuture<'_, Result<()>>;

    /// Create `dir` fresh: pre-existing contents are deleted, not merged.
    fn clear_dir(&self, dir: &Path) -> BoxFuture<'_, Result<()>>;
}

/// Target format for the converted final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Pdf,
    Html,
}

/// Render/convert collaborator for the final document. Opaque to the
/// engine: it only threads sections and summaries through in order.
pub trait ReportRenderer: Send + Sync + 'static {
    /// Merge section documents and per-artifact summaries into one
    /// Markdown report. `sections` is ordered; the renderer must not
    /// reorder it.
    fn render_markdown(
        &self,
        query: &Query,
        sections: &[(ArtifactHandle, PathBuf)],
        summaries: &HashMap<ArtifactHandle, SummaryRecord>,
    ) -> BoxFuture<'_, Result<PathBuf>>;

    /// Convert a rendered document to a second output format.
    fn convert(&self, document: &Path, target: OutputFormat) -> BoxFuture<'_, Result<PathBuf>>;
}
