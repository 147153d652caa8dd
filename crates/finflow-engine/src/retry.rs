use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use finflow_core::config::RetryConfig;
use finflow_core::event::{EventBus, FlowEvent};
use finflow_core::traits::TaskExecutor;
use finflow_core::types::{InvokeOutcome, TaskInput, TaskOutput};

/// Invokes an external task executor with bounded retry and fixed backoff.
///
/// Every stage goes through the same invoker, so retry policy is uniform
/// across the flow. Exhausting the retry budget never raises: the caller
/// receives a degraded `InvokeOutcome` carrying the last error text, so a
/// fan-out over many entities cannot be aborted by one entity's
/// exhaustion.
#[derive(Clone)]
pub struct RetryingInvoker {
    config: RetryConfig,
    bus: Option<Arc<EventBus>>,
}

impl RetryingInvoker {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, bus: None }
    }

    /// Publish a `RetryAttempt` event for each failed attempt.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Attempt the executor call up to `max_retries` times, sleeping the
    /// configured fixed delay between attempts. No backoff growth and no
    /// jitter: the collaborators are rate-limited externally.
    pub async fn invoke(&self, executor: &dyn TaskExecutor, input: TaskInput) -> InvokeOutcome {
        let max_retries = self.config.max_retries;
        let mut last_error = String::new();

        for attempt in 1..=max_retries {
            match executor.execute(input.clone()).await {
                Ok(output) => {
                    return InvokeOutcome {
                        output,
                        succeeded: true,
                        last_error: None,
                    };
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(
                        task = %input.task,
                        attempt,
                        max_retries,
                        error = %last_error,
                        "Task executor call failed"
                    );
                    if let Some(bus) = &self.bus {
                        bus.publish(FlowEvent::RetryAttempt {
                            task: input.task.clone(),
                            attempt,
                            error: last_error.clone(),
                        });
                    }
                    if attempt < max_retries && self.config.delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
                    }
                }
            }
        }

        // Degraded result: a usable value in place of the failure
        InvokeOutcome {
            output: TaskOutput::text(format!(
                "The task executor returned the following error: {}",
                last_error
            )),
            succeeded: false,
            last_error: Some(last_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures::future::BoxFuture;

    use finflow_core::error::{FlowError, Result};

    struct AlwaysFails {
        attempts: AtomicU32,
    }

    impl TaskExecutor for AlwaysFails {
        fn execute(&self, _input: TaskInput) -> BoxFuture<'_, Result<TaskOutput>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(FlowError::Task("endpoint unavailable".into())) })
        }
    }

    struct FailsThenSucceeds {
        attempts: AtomicU32,
        fail_first: u32,
    }

    impl TaskExecutor for FailsThenSucceeds {
        fn execute(&self, _input: TaskInput) -> BoxFuture<'_, Result<TaskOutput>> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < self.fail_first {
                    Err(FlowError::Task("transient".into()))
                } else {
                    Ok(TaskOutput::text("recovered"))
                }
            })
        }
    }

    fn no_delay(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            delay_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_exhaustion_makes_exactly_max_retries_attempts() {
        let executor = AlwaysFails {
            attempts: AtomicU32::new(0),
        };
        let invoker = RetryingInvoker::new(no_delay(4));

        let outcome = invoker
            .invoke(&executor, TaskInput::new("probe", serde_json::Value::Null))
            .await;

        assert_eq!(executor.attempts.load(Ordering::SeqCst), 4);
        assert!(!outcome.succeeded);
    }

    #[tokio::test]
    async fn test_degraded_result_carries_last_error() {
        let executor = AlwaysFails {
            attempts: AtomicU32::new(0),
        };
        let invoker = RetryingInvoker::new(no_delay(3));

        let outcome = invoker
            .invoke(&executor, TaskInput::new("probe", serde_json::Value::Null))
            .await;

        assert_eq!(outcome.last_error.as_deref(), Some("Task execution failed: endpoint unavailable"));
        assert!(outcome.output.text.contains("endpoint unavailable"));
    }

    #[tokio::test]
    async fn test_recovers_within_budget() {
        let executor = FailsThenSucceeds {
            attempts: AtomicU32::new(0),
            fail_first: 2,
        };
        let invoker = RetryingInvoker::new(no_delay(3));

        let outcome = invoker
            .invoke(&executor, TaskInput::new("probe", serde_json::Value::Null))
            .await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.output.text, "recovered");
        assert_eq!(executor.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_attempts_published() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();

        let executor = AlwaysFails {
            attempts: AtomicU32::new(0),
        };
        let invoker = RetryingInvoker::new(no_delay(2)).with_bus(bus);
        invoker
            .invoke(&executor, TaskInput::new("probe", serde_json::Value::Null))
            .await;

        let mut seen = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, FlowEvent::RetryAttempt { .. }) {
                seen += 1;
            }
        }
        assert_eq!(seen, 2);
    }
}
