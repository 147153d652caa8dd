use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use finflow_core::error::Result;
use finflow_core::event::{EventBus, FlowEvent};
use finflow_core::traits::{ArtifactStore, OutputFormat, ReportRenderer, TaskExecutor};
use finflow_core::types::{ArtifactHandle, Query, SummaryRecord, TaskInput};

use crate::retry::RetryingInvoker;

/// Consumes the global report list and produces the final document.
///
/// Per artifact: a section-writing pass and a summarization pass, then
/// one merge through the render collaborator followed by a format
/// conversion. The global list order is preserved end to end; it is the
/// sole ordering guarantee the flow makes to the end user.
pub struct ReportSynthesizer {
    store: Arc<dyn ArtifactStore>,
    renderer: Arc<dyn ReportRenderer>,
    section: Arc<dyn TaskExecutor>,
    summary: Arc<dyn TaskExecutor>,
    invoker: RetryingInvoker,
    cache_dir: PathBuf,
    bus: Option<Arc<EventBus>>,
}

impl ReportSynthesizer {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        renderer: Arc<dyn ReportRenderer>,
        section: Arc<dyn TaskExecutor>,
        summary: Arc<dyn TaskExecutor>,
        invoker: RetryingInvoker,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            renderer,
            section,
            summary,
            invoker,
            cache_dir: cache_dir.into(),
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub async fn synthesize(
        &self,
        query: &Query,
        report_list: &[ArtifactHandle],
    ) -> Result<PathBuf> {
        let mut sections: Vec<(ArtifactHandle, PathBuf)> = Vec::new();
        let mut summaries: HashMap<ArtifactHandle, SummaryRecord> = HashMap::new();

        for handle in report_list {
            let content = self.store.read_to_string(&handle.path).await?;

            let section_path = self.section_path(handle);
            let section_outcome = self
                .invoker
                .invoke(
                    &*self.section,
                    TaskInput::new("section", serde_json::json!({ "section": content })),
                )
                .await;
            self.store
                .write(&section_path, &section_outcome.output.text)
                .await?;
            sections.push((handle.clone(), section_path));

            let summary_outcome = self
                .invoker
                .invoke(
                    &*self.summary,
                    TaskInput::new("summary", serde_json::json!({ "section": content })),
                )
                .await;
            summaries.insert(handle.clone(), parse_summary(handle, &summary_outcome.output));

            debug!(path = %handle.path.display(), "Artifact summarized");
        }

        info!(sections = sections.len(), "Rendering final report");
        let document = self
            .renderer
            .render_markdown(query, &sections, &summaries)
            .await?;
        // PDF conversion goes through an HTML intermediate
        let html = self.renderer.convert(&document, OutputFormat::Html).await?;
        let converted = self.renderer.convert(&html, OutputFormat::Pdf).await?;
        debug!(converted = %converted.display(), "Report converted");

        if let Some(bus) = &self.bus {
            bus.publish(FlowEvent::ReportReady {
                path: document.clone(),
            });
        }

        Ok(document)
    }

    fn section_path(&self, handle: &ArtifactHandle) -> PathBuf {
        let name = handle
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact.txt".to_string());
        self.cache_dir.join(format!("section_{}", name))
    }
}

/// Parse a summarization output into a SummaryRecord. Executors that
/// return a structured payload are taken at their word; otherwise the
/// raw text becomes the summary and the artifact name the headline.
fn parse_summary(
    handle: &ArtifactHandle,
    output: &finflow_core::types::TaskOutput,
) -> SummaryRecord {
    if let Ok(record) = serde_json::from_value::<SummaryRecord>(output.payload.clone()) {
        return record;
    }
    let headline = handle
        .path
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| handle.branch.to_string());
    SummaryRecord {
        headline,
        summary: output.text.clone(),
    }
}
