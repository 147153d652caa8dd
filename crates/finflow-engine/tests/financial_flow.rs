//! End-to-end runs of the financial flow against scripted executors and a
//! real filesystem store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;

use finflow_core::config::{FlowConfig, RetryConfig, SourceFlags, WorkflowRequest};
use finflow_core::error::{FlowError, Result};
use finflow_core::traits::{ArtifactStore, OutputFormat, ReportRenderer, TaskExecutor};
use finflow_core::types::{ArtifactHandle, Query, SummaryRecord, TaskInput, TaskOutput};
use finflow_engine::{FinancialFlow, FlowExecutors};
use finflow_store::FsArtifactStore;

/// Executor that answers with fixed text, or a fixed JSON payload.
struct Scripted {
    text: String,
    payload: serde_json::Value,
    fail: bool,
}

impl Scripted {
    fn text(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            payload: serde_json::Value::Null,
            fail: false,
        })
    }

    fn payload(payload: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            text: String::new(),
            payload,
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            text: String::new(),
            payload: serde_json::Value::Null,
            fail: true,
        })
    }
}

impl TaskExecutor for Scripted {
    fn execute(&self, _input: TaskInput) -> BoxFuture<'_, Result<TaskOutput>> {
        Box::pin(async move {
            if self.fail {
                return Err(FlowError::Task("collaborator offline".into()));
            }
            Ok(TaskOutput {
                text: self.text.clone(),
                payload: self.payload.clone(),
            })
        })
    }
}

/// Retrieval executor that echoes the requested ticker.
struct TickerEcho;

impl TaskExecutor for TickerEcho {
    fn execute(&self, input: TaskInput) -> BoxFuture<'_, Result<TaskOutput>> {
        Box::pin(async move {
            let ticker = input.payload["ticker"].as_str().unwrap_or("?").to_string();
            Ok(TaskOutput::text(format!("{} data for {}", input.task, ticker)))
        })
    }
}

/// Renderer that writes a plain merged document and records what it saw.
struct RecordingRenderer {
    out_dir: PathBuf,
    sections_seen: Mutex<Vec<ArtifactHandle>>,
}

impl RecordingRenderer {
    fn new(out_dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            out_dir: out_dir.to_path_buf(),
            sections_seen: Mutex::new(Vec::new()),
        })
    }
}

impl ReportRenderer for RecordingRenderer {
    fn render_markdown(
        &self,
        query: &Query,
        sections: &[(ArtifactHandle, PathBuf)],
        summaries: &HashMap<ArtifactHandle, SummaryRecord>,
    ) -> BoxFuture<'_, Result<PathBuf>> {
        let handles: Vec<ArtifactHandle> = sections.iter().map(|(h, _)| h.clone()).collect();
        let body = format!("# {}\n\nsections: {}\nsummaries: {}\n", query, sections.len(), summaries.len());
        Box::pin(async move {
            *self.sections_seen.lock().unwrap() = handles;
            let path = self.out_dir.join("report.md");
            std::fs::write(&path, body)?;
            Ok(path)
        })
    }

    fn convert(&self, document: &Path, target: OutputFormat) -> BoxFuture<'_, Result<PathBuf>> {
        let extension = match target {
            OutputFormat::Html => "html",
            OutputFormat::Pdf => "pdf",
        };
        let converted = document.with_extension(extension);
        Box::pin(async move {
            std::fs::write(&converted, "converted")?;
            Ok(converted)
        })
    }
}

fn two_entity_extraction() -> Arc<Scripted> {
    Scripted::payload(serde_json::json!({
        "entities": [
            {
                "company": "Apple Inc.",
                "ticker": "AAPL",
                "start_date": "2023-01-01",
                "end_date": "2023-12-31",
                "query": "AAPL revenue"
            },
            {
                "company": "Microsoft Corporation",
                "ticker": "MSFT",
                "start_date": "2023-01-01",
                "end_date": "2023-12-31",
                "query": "MSFT revenue"
            }
        ]
    }))
}

fn comparison_decomposition() -> Arc<Scripted> {
    Scripted::payload(serde_json::json!({
        "queries": ["AAPL revenue", "MSFT revenue"],
        "is_comparison": true
    }))
}

fn executors(dir: &Path) -> (FlowExecutors, Arc<RecordingRenderer>) {
    let renderer = RecordingRenderer::new(dir);
    let executors = FlowExecutors {
        generic_research: Scripted::text("general findings"),
        decomposition: comparison_decomposition(),
        extraction: two_entity_extraction(),
        sec_filings: Arc::new(TickerEcho),
        yfinance_news: Arc::new(TickerEcho),
        yfinance_stocks: Arc::new(TickerEcho),
        refine: None,
        comparison: Scripted::text("comparison analysis"),
        section: Scripted::text("a section"),
        summary: Scripted::text("a summary"),
    };
    (executors, renderer)
}

fn config(dir: &Path) -> FlowConfig {
    let mut config = FlowConfig::new(dir.join("cache"));
    config.retry = RetryConfig {
        max_retries: 2,
        delay_ms: 0,
    };
    config
}

#[tokio::test]
async fn test_stocks_comparison_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let (executors, renderer) = executors(dir.path());
    let store = Arc::new(FsArtifactStore::new());
    let flow = FinancialFlow::new(config(dir.path()), executors, store.clone(), renderer.clone());

    let sources = SourceFlags {
        yfinance_stocks: true,
        ..SourceFlags::default()
    };
    let report = flow
        .run(WorkflowRequest::new("Compare AAPL and MSFT revenue", sources))
        .await
        .unwrap();

    assert!(report.ends_with("report.md"));
    // Conversion produced both intermediate and final documents
    assert!(dir.path().join("report.html").is_file());
    assert!(dir.path().join("report.pdf").is_file());

    // Two entity artifacts plus one comparison artifact reached synthesis
    let seen = renderer.sections_seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0].path.file_name().unwrap(), "yfinance_stocks_AAPL.txt");
    assert_eq!(seen[1].path.file_name().unwrap(), "yfinance_stocks_MSFT.txt");
    assert_eq!(
        seen[2].path.file_name().unwrap(),
        "comparison_yfinance_stocks_analysis.txt"
    );

    // Section files landed in the cache for each artifact
    let cache = dir.path().join("cache");
    for name in [
        "section_yfinance_stocks_AAPL.txt",
        "section_yfinance_stocks_MSFT.txt",
        "section_comparison_yfinance_stocks_analysis.txt",
    ] {
        assert!(
            store.read_to_string(&cache.join(name)).await.is_ok(),
            "missing {name}"
        );
    }
}

#[tokio::test]
async fn test_all_sources_disabled_is_a_degenerate_success() {
    let dir = tempfile::tempdir().unwrap();
    let (executors, renderer) = executors(dir.path());
    let flow = FinancialFlow::new(
        config(dir.path()),
        executors,
        Arc::new(FsArtifactStore::new()),
        renderer.clone(),
    );

    let report = flow
        .run(WorkflowRequest::new("Anything at all", SourceFlags::default()))
        .await
        .unwrap();

    assert!(report.ends_with("report.md"));
    assert!(renderer.sections_seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_generic_search_only() {
    let dir = tempfile::tempdir().unwrap();
    let (executors, renderer) = executors(dir.path());
    let flow = FinancialFlow::new(
        config(dir.path()),
        executors,
        Arc::new(FsArtifactStore::new()),
        renderer.clone(),
    );

    let sources = SourceFlags {
        generic_search: true,
        ..SourceFlags::default()
    };
    flow.run(WorkflowRequest::new("What moved markets today?", sources))
        .await
        .unwrap();

    let seen = renderer.sections_seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].path.file_name().unwrap(), "report_generic_search.txt");
}

#[tokio::test]
async fn test_all_branches_contribute_in_declaration_order() {
    let dir = tempfile::tempdir().unwrap();
    let (executors, renderer) = executors(dir.path());
    let flow = FinancialFlow::new(
        config(dir.path()),
        executors,
        Arc::new(FsArtifactStore::new()),
        renderer.clone(),
    );

    let sources = SourceFlags {
        generic_search: true,
        sec_filings: true,
        yfinance_news: true,
        yfinance_stocks: true,
    };
    flow.run(WorkflowRequest::new("Compare AAPL and MSFT", sources))
        .await
        .unwrap();

    let seen = renderer.sections_seen.lock().unwrap().clone();
    // 1 generic + 3 per entity-branch (2 entities + comparison)
    assert_eq!(seen.len(), 10);

    let names: Vec<String> = seen
        .iter()
        .map(|h| h.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "report_generic_search.txt",
            "sec_filings_AAPL.txt",
            "sec_filings_MSFT.txt",
            "comparison_sec_filings_analysis.txt",
            "yfinance_news_AAPL.txt",
            "yfinance_news_MSFT.txt",
            "comparison_yfinance_news_analysis.txt",
            "yfinance_stocks_AAPL.txt",
            "yfinance_stocks_MSFT.txt",
            "comparison_yfinance_stocks_analysis.txt",
        ]
    );
}

#[tokio::test]
async fn test_persistent_extraction_failure_is_fatal_and_names_the_stage() {
    let dir = tempfile::tempdir().unwrap();
    let (mut executors, renderer) = executors(dir.path());
    executors.extraction = Scripted::failing();

    let flow = FinancialFlow::new(
        config(dir.path()),
        executors,
        Arc::new(FsArtifactStore::new()),
        renderer.clone(),
    );

    let sources = SourceFlags {
        yfinance_news: true,
        ..SourceFlags::default()
    };
    let err = flow
        .run(WorkflowRequest::new("Compare AAPL and MSFT", sources))
        .await
        .unwrap_err();

    match err {
        FlowError::Stage { stage, .. } => assert_eq!(stage, "information_extraction"),
        other => panic!("expected a stage failure, got {other}"),
    }
    // No partial report was produced
    assert!(renderer.sections_seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_stale_cache_contents_are_cleared() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    std::fs::create_dir_all(&cache).unwrap();
    std::fs::write(cache.join("comparison_yfinance_stocks.txt"), "stale corpus").unwrap();

    let (executors, renderer) = executors(dir.path());
    let store = Arc::new(FsArtifactStore::new());
    let flow = FinancialFlow::new(config(dir.path()), executors, store.clone(), renderer);

    let sources = SourceFlags {
        yfinance_stocks: true,
        ..SourceFlags::default()
    };
    flow.run(WorkflowRequest::new("Compare AAPL and MSFT revenue", sources))
        .await
        .unwrap();

    let corpus = store
        .read_to_string(&cache.join("comparison_yfinance_stocks.txt"))
        .await
        .unwrap();
    assert!(!corpus.contains("stale corpus"));
}

#[tokio::test]
async fn test_invalid_config_rejected_before_any_stage() {
    let dir = tempfile::tempdir().unwrap();
    let (executors, renderer) = executors(dir.path());
    let flow = FinancialFlow::new(
        FlowConfig::new(""),
        executors,
        Arc::new(FsArtifactStore::new()),
        renderer.clone(),
    );

    let err = flow
        .run(WorkflowRequest::new("query", SourceFlags::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Config(_)));
    assert!(renderer.sections_seen.lock().unwrap().is_empty());
}
