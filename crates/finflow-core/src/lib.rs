pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::{FlowConfig, RetryConfig, SourceFlags, WorkflowRequest};
pub use error::{FlowError, Result};
pub use event::{EventBus, FlowEvent};
pub use types::*;
