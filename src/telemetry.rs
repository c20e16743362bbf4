use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{ConciergeError, Result};
use crate::llm::{LanguageModel, ModelResponse};
use crate::message::Message;
use crate::tool::ToolDescription;

/// Dimensions attached to every telemetry event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryLabels {
    pub agent: Option<String>,
    pub tool: Option<String>,
}

impl TelemetryLabels {
    pub fn agent(name: impl Into<String>) -> Self {
        Self {
            agent: Some(name.into()),
            tool: None,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub kind: String,
    pub timestamp: SystemTime,
    pub labels: TelemetryLabels,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub context: String,
    pub error: String,
    pub attempt: u32,
    pub labels: TelemetryLabels,
}

/// In-process event sink shared between agents. Cloning shares the buffers.
#[derive(Default, Clone)]
pub struct TelemetryCollector {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
    failures: Arc<Mutex<Vec<FailureRecord>>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl TelemetryCollector {
    pub fn record(
        &self,
        kind: impl Into<String>,
        labels: TelemetryLabels,
        detail: serde_json::Value,
    ) {
        locked(&self.events).push(TelemetryEvent {
            kind: kind.into(),
            timestamp: SystemTime::now(),
            labels,
            detail,
        });
    }

    pub fn record_failure(
        &self,
        context: impl Into<String>,
        error: impl Into<String>,
        attempt: u32,
        labels: TelemetryLabels,
    ) {
        locked(&self.failures).push(FailureRecord {
            context: context.into(),
            error: error.into(),
            attempt,
            labels,
        });
    }

    /// Events of one kind, without draining.
    pub fn events_of(&self, kind: &str) -> Vec<TelemetryEvent> {
        locked(&self.events)
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }

    pub fn drain(&self) -> (Vec<TelemetryEvent>, Vec<FailureRecord>) {
        let mut events = locked(&self.events);
        let mut failures = locked(&self.failures);
        (std::mem::take(&mut *events), std::mem::take(&mut *failures))
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn default_external_call() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(200),
        }
    }

    /// Run `f` until it succeeds, fails with a non-retryable error, or the
    /// retries run out. Backoff grows linearly with the attempt number.
    pub async fn retry<F, Fut, T>(
        &self,
        mut f: F,
        telemetry: Option<&TelemetryCollector>,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        for attempt in 0..=self.max_retries {
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if let Some(t) = telemetry {
                        t.record_failure("retry", err.to_string(), attempt, TelemetryLabels::default());
                    }
                    if attempt == self.max_retries || !err.is_retryable() {
                        return Err(err);
                    }
                    tracing::warn!(attempt, error = %err, "retrying model call");
                    sleep(self.backoff * (attempt + 1)).await;
                }
            }
        }
        Err(ConciergeError::Protocol("retry exhausted".into()))
    }
}

/// Wraps a model so transient failures (rate limits, transport errors,
/// timeouts) are retried before they reach the agent loop.
pub struct RetryingModel<M> {
    inner: M,
    policy: RetryPolicy,
    telemetry: Option<TelemetryCollector>,
}

impl<M: LanguageModel> RetryingModel<M> {
    pub fn new(inner: M, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }
}

#[async_trait]
impl<M: LanguageModel> LanguageModel for RetryingModel<M> {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelResponse> {
        self.policy
            .retry(
                |_| self.inner.complete_chat(messages, tools),
                self.telemetry.as_ref(),
            )
            .await
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
/// Calling this twice is harmless; the second call is ignored.
pub fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
