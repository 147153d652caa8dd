//! Run the financial flow end to end against canned executors.
//!
//! ```sh
//! cargo run -p finflow-engine --example run_flow
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use finflow_core::config::{FlowConfig, RetryConfig, SourceFlags, WorkflowRequest};
use finflow_core::error::Result;
use finflow_core::traits::{OutputFormat, ReportRenderer, TaskExecutor};
use finflow_core::types::{ArtifactHandle, Query, SummaryRecord, TaskInput, TaskOutput};
use finflow_engine::{FinancialFlow, FlowExecutors};
use finflow_store::FsArtifactStore;

struct CannedExecutor {
    payload: serde_json::Value,
    text: &'static str,
}

impl TaskExecutor for CannedExecutor {
    fn execute(&self, input: TaskInput) -> BoxFuture<'_, Result<TaskOutput>> {
        Box::pin(async move {
            info!(task = %input.task, "Executor invoked");
            Ok(TaskOutput {
                text: self.text.to_string(),
                payload: self.payload.clone(),
            })
        })
    }
}

fn canned(text: &'static str) -> Arc<CannedExecutor> {
    Arc::new(CannedExecutor {
        payload: serde_json::Value::Null,
        text,
    })
}

struct PlainRenderer {
    out_dir: PathBuf,
}

impl ReportRenderer for PlainRenderer {
    fn render_markdown(
        &self,
        query: &Query,
        sections: &[(ArtifactHandle, PathBuf)],
        summaries: &HashMap<ArtifactHandle, SummaryRecord>,
    ) -> BoxFuture<'_, Result<PathBuf>> {
        let mut body = format!("# {}\n\n", query);
        for (handle, section_path) in sections {
            let text = std::fs::read_to_string(section_path).unwrap_or_default();
            body.push_str(&format!("## {}\n\n{}\n\n", handle.path.display(), text));
            if let Some(summary) = summaries.get(handle) {
                body.push_str(&format!("> {}\n\n", summary.summary));
            }
        }
        Box::pin(async move {
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
            std::fs::write(&converted, "placeholder")?;
            Ok(converted)
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let out_dir = std::env::temp_dir().join("finflow-demo");
    std::fs::create_dir_all(&out_dir)?;

    let mut config = FlowConfig::new(out_dir.join("cache"));
    config.retry = RetryConfig {
        max_retries: 3,
        delay_ms: 500,
    };

    let executors = FlowExecutors {
        generic_research: canned("Broad market research findings."),
        decomposition: Arc::new(CannedExecutor {
            payload: serde_json::json!({
                "queries": ["AAPL revenue", "MSFT revenue"],
                "is_comparison": true
            }),
            text: "",
        }),
        extraction: Arc::new(CannedExecutor {
            payload: serde_json::json!({
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
            }),
            text: "",
        }),
        sec_filings: canned("Filing excerpts."),
        yfinance_news: canned("Recent coverage."),
        yfinance_stocks: canned("Price and volume analysis."),
        refine: None,
        comparison: canned("The two companies diverge on revenue growth."),
        section: canned("A polished report section."),
        summary: canned("One-line takeaway."),
    };

    let flow = FinancialFlow::new(
        config,
        executors,
        Arc::new(FsArtifactStore::new()),
        Arc::new(PlainRenderer {
            out_dir: out_dir.clone(),
        }),
    );

    let sources = SourceFlags {
        generic_search: true,
        yfinance_stocks: true,
        ..SourceFlags::default()
    };
    let report = flow
        .run(WorkflowRequest::new("Compare AAPL and MSFT revenue", sources))
        .await?;

    info!(report = %report.display(), "Flow complete");
    println!("report written to {}", report.display());
    Ok(())
}
