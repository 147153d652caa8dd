use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // External collaborator errors
    #[error("Task execution failed: {0}")]
    Task(String),

    #[error("Render failed: {0}")]
    Render(String),

    // Stage errors
    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    // Graph errors
    #[error("Stage graph error: {0}")]
    Graph(String),

    // Artifact storage errors
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(PathBuf),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    Toml(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Wrap any error as a stage failure, tagging the originating stage.
    pub fn stage(stage: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Stage {
            stage: stage.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
