use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::types::Query;

/// Retry policy for external executor invocations.
///
/// Deliberately simple: bounded attempts with a fixed delay, no
/// exponential backoff and no jitter. The collaborators are rate-limited
/// on their side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            delay_ms: default_delay_ms(),
        }
    }
}

/// Which data sources a run draws from. Evaluated once at decomposition
/// time and immutable for the remainder of the run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SourceFlags {
    #[serde(default)]
    pub generic_search: bool,
    #[serde(default)]
    pub sec_filings: bool,
    #[serde(default)]
    pub yfinance_news: bool,
    #[serde(default)]
    pub yfinance_stocks: bool,
}

impl SourceFlags {
    /// Whether any per-entity source is requested. When false, query
    /// decomposition substitutes a trivial plan and information
    /// extraction is skipped entirely.
    pub fn any_entity_source(&self) -> bool {
        self.sec_filings || self.yfinance_news || self.yfinance_stocks
    }
}

/// Top-level flow configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowConfig {
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_comparison_query")]
    pub comparison_query: String,
}

fn default_comparison_query() -> String {
    "Compare the documents above across all shared financial aspects, \
     highlighting the most significant differences."
        .to_string()
}

impl FlowConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            retry: RetryConfig::default(),
            comparison_query: default_comparison_query(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FlowError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&text).map_err(|e| FlowError::Toml(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject invalid configuration synchronously, before any stage starts.
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(FlowError::Config("cache_dir must not be empty".into()));
        }
        if self.cache_dir.is_file() {
            return Err(FlowError::Config(format!(
                "cache_dir '{}' is a file, expected a directory path",
                self.cache_dir.display()
            )));
        }
        if self.retry.max_retries == 0 {
            return Err(FlowError::Config("retry.max_retries must be at least 1".into()));
        }
        Ok(())
    }
}

/// The host application boundary: one request in, one report handle out.
#[derive(Debug, Clone)]
pub struct WorkflowRequest {
    pub query: Query,
    pub sources: SourceFlags,
}

impl WorkflowRequest {
    pub fn new(query: impl Into<String>, sources: SourceFlags) -> Self {
        Self {
            query: Query::new(query),
            sources,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.as_str().trim().is_empty() {
            return Err(FlowError::Config("query must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_retry_defaults() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.delay_ms, 10_000);
    }

    #[test]
    fn test_any_entity_source() {
        let mut flags = SourceFlags::default();
        assert!(!flags.any_entity_source());

        flags.generic_search = true;
        assert!(!flags.any_entity_source());

        flags.yfinance_news = true;
        assert!(flags.any_entity_source());
    }

    #[test]
    fn test_load_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "cache_dir = \"/tmp/finflow-cache\"").unwrap();

        let config = FlowConfig::load(file.path()).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/finflow-cache"));
        assert_eq!(config.retry.max_retries, 3);
        assert!(!config.comparison_query.is_empty());
    }

    #[test]
    fn test_empty_cache_dir_rejected() {
        let config = FlowConfig::new("");
        assert!(matches!(config.validate(), Err(FlowError::Config(_))));
    }

    #[test]
    fn test_cache_dir_pointing_at_file_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = FlowConfig::new(file.path());
        assert!(matches!(config.validate(), Err(FlowError::Config(_))));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let mut config = FlowConfig::new("/tmp/finflow-cache");
        config.retry.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_query_rejected() {
        let request = WorkflowRequest::new("   ", SourceFlags::default());
        assert!(request.validate().is_err());
    }
}
