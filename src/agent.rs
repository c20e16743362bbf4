use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ConciergeError, Result};
use crate::llm::{LanguageModel, ModelResponse};
use crate::message::{last_assistant_text, Message, ToolCall};
use crate::metrics::{MetricsTracker, RunGuard};
use crate::prompts::PromptTemplate;
use crate::telemetry::{TelemetryCollector, TelemetryLabels};
use crate::tool::{ToolDescription, ToolOutput, ToolRegistry};

/// Appended when the model still asks for tools on the last permitted step.
pub const STEP_LIMIT_FALLBACK: &str =
    "Sorry, I could not complete the request within the allotted steps.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    FinalAnswer,
    StepLimit,
}

/// Where the loop goes next, judged from the last message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// A user message or tool results are waiting for the model.
    AwaitingModel,
    /// The model asked for at least one tool.
    DispatchingTools,
    /// The model answered without tools; the run is over.
    Finished,
}

pub fn route_after_model(messages: &[Message]) -> LoopState {
    match messages.last() {
        Some(message) if message.is_assistant() && !message.tool_calls().is_empty() => {
            LoopState::DispatchingTools
        }
        Some(message) if message.is_assistant() => LoopState::Finished,
        _ => LoopState::AwaitingModel,
    }
}

/// Working state of one invocation. Never outlives it.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub remaining_steps: usize,
}

impl ConversationState {
    pub fn new(messages: Vec<Message>, step_budget: usize) -> Self {
        Self {
            messages,
            remaining_steps: step_budget,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub messages: Vec<Message>,
    pub stop_reason: StopReason,
    pub model_calls: usize,
    pub tool_calls: usize,
}

impl RunOutcome {
    pub fn final_text(&self) -> Option<String> {
        last_assistant_text(&self.messages)
    }
}

/// Run the tool-calling loop once over `initial_messages` and return the
/// extended conversation. Tool calls of one turn run concurrently.
pub async fn run(
    initial_messages: Vec<Message>,
    tools: &ToolRegistry,
    model: &dyn LanguageModel,
    system_prompt: &str,
    step_budget: usize,
) -> Result<Vec<Message>> {
    let cancel = CancellationToken::new();
    let runner = LoopRunner {
        tools,
        model,
        model_timeout: None,
        tool_timeout: None,
        parallel_tools: true,
        cancel: &cancel,
        telemetry: None,
        labels: TelemetryLabels::default(),
    };
    let outcome = runner
        .run(initial_messages, system_prompt, step_budget, &mut None)
        .await?;
    Ok(outcome.messages)
}

/// What the model is shown: the system prompt followed by the conversation,
/// minus tool calls that were never answered (and results nothing asked for).
pub fn model_view(system_prompt: &str, messages: &[Message]) -> Vec<Message> {
    let mut view = Vec::with_capacity(messages.len() + 1);
    view.push(Message::system(system_prompt));

    let mut open: HashSet<String> = HashSet::new();
    for (index, message) in messages.iter().enumerate() {
        match message {
            Message::Assistant { text, tool_calls } => {
                let answered: HashSet<&str> = messages[index + 1..]
                    .iter()
                    .take_while(|next| matches!(next, Message::ToolResult { .. }))
                    .filter_map(Message::tool_call_id)
                    .collect();
                let kept: Vec<ToolCall> = tool_calls
                    .iter()
                    .filter(|call| answered.contains(call.id.as_str()))
                    .cloned()
                    .collect();
                open = kept.iter().map(|call| call.id.clone()).collect();
                if text.is_empty() && kept.is_empty() {
                    continue;
                }
                view.push(Message::assistant_with_calls(text.clone(), kept));
            }
            Message::ToolResult { tool_call_id, .. } => {
                if open.remove(tool_call_id) {
                    view.push(message.clone());
                }
            }
            other => {
                open.clear();
                view.push(other.clone());
            }
        }
    }
    view
}

/// Give every call a usable id. Empty or repeated ids are replaced.
pub fn normalize_call_ids(calls: &mut [ToolCall]) {
    let mut seen = HashSet::new();
    for call in calls.iter_mut() {
        if call.id.trim().is_empty() || !seen.insert(call.id.clone()) {
            call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
            seen.insert(call.id.clone());
        }
    }
}

fn error_payload(err: &ConciergeError) -> Value {
    json!({
        "status": "error",
        "error": err.kind(),
        "message": err.to_string(),
    })
}

struct LoopRunner<'a> {
    tools: &'a ToolRegistry,
    model: &'a dyn LanguageModel,
    model_timeout: Option<Duration>,
    tool_timeout: Option<Duration>,
    parallel_tools: bool,
    cancel: &'a CancellationToken,
    telemetry: Option<&'a TelemetryCollector>,
    labels: TelemetryLabels,
}

impl LoopRunner<'_> {
    async fn run(
        &self,
        initial_messages: Vec<Message>,
        system_prompt: &str,
        step_budget: usize,
        guard: &mut Option<RunGuard>,
    ) -> Result<RunOutcome> {
        if step_budget == 0 {
            return Err(ConciergeError::InvalidStepBudget(step_budget));
        }

        let descriptions = self.tools.describe();
        let mut state = ConversationState::new(initial_messages, step_budget);
        let mut model_calls = 0;
        let mut tool_calls = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ConciergeError::Cancelled);
            }

            debug!(
                agent = self.labels.agent.as_deref().unwrap_or("anonymous"),
                step = model_calls + 1,
                remaining = state.remaining_steps,
                "calling model"
            );
            let view = model_view(system_prompt, &state.messages);
            let response = self.call_model(&view, &descriptions).await?;
            model_calls += 1;
            state.remaining_steps -= 1;
            if let Some(guard) = guard.as_mut() {
                guard.record_model_call();
            }
            if let Some(telemetry) = self.telemetry {
                telemetry.record(
                    "model_call",
                    self.labels.clone(),
                    json!({"step": model_calls, "tool_calls": response.has_tool_calls()}),
                );
            }

            let (text, mut calls) = match response {
                ModelResponse::Final { text } => {
                    state.messages.push(Message::assistant(text));
                    info!(model_calls, tool_calls, "agent produced a final answer");
                    return Ok(RunOutcome {
                        messages: state.messages,
                        stop_reason: StopReason::FinalAnswer,
                        model_calls,
                        tool_calls,
                    });
                }
                ModelResponse::ToolCalls { text, calls } => (text, calls),
            };
            normalize_call_ids(&mut calls);

            if state.remaining_steps == 0 {
                warn!(
                    model_calls,
                    pending = calls.len(),
                    "step budget exhausted with tool calls pending"
                );
                state.messages.push(Message::assistant_with_calls(text, calls));
                state.messages.push(Message::assistant(STEP_LIMIT_FALLBACK));
                if let Some(telemetry) = self.telemetry {
                    telemetry.record("step_limit", self.labels.clone(), json!({"step_budget": step_budget}));
                }
                return Ok(RunOutcome {
                    messages: state.messages,
                    stop_reason: StopReason::StepLimit,
                    model_calls,
                    tool_calls,
                });
            }

            let results = self.dispatch(&calls, guard).await?;
            tool_calls += calls.len();
            state.messages.push(Message::assistant_with_calls(text, calls));
            state.messages.extend(results);
            debug_assert_eq!(route_after_model(&state.messages), LoopState::AwaitingModel);
        }
    }

    async fn call_model(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelResponse> {
        let call = async {
            match self.model_timeout {
                Some(after) => tokio::time::timeout(after, self.model.complete_chat(messages, tools))
                    .await
                    .unwrap_or_else(|_| {
                        Err(ConciergeError::Timeout {
                            what: "model call".into(),
                            after,
                        })
                    }),
                None => self.model.complete_chat(messages, tools).await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ConciergeError::Cancelled),
            response = call => response,
        }
    }

    /// Run one batch of calls and return their results in call order.
    async fn dispatch(
        &self,
        calls: &[ToolCall],
        guard: &mut Option<RunGuard>,
    ) -> Result<Vec<Message>> {
        let batch = async {
            if self.parallel_tools && calls.len() > 1 {
                join_all(calls.iter().map(|call| self.execute(call))).await
            } else {
                let mut outputs = Vec::with_capacity(calls.len());
                for call in calls {
                    outputs.push(self.execute(call).await);
                }
                outputs
            }
        };
        let outputs = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ConciergeError::Cancelled),
            outputs = batch => outputs,
        };

        let mut results = Vec::with_capacity(calls.len());
        for (call, output) in calls.iter().zip(outputs) {
            if let Some(guard) = guard.as_mut() {
                guard.record_tool_call();
            }
            match output {
                Ok(output) => results.push(Message::tool_result(&call.id, output.into_value())),
                Err(err) => {
                    warn!(tool = %call.name, error = %err, "tool call failed");
                    if let Some(guard) = guard.as_mut() {
                        guard.record_failure();
                    }
                    if let Some(telemetry) = self.telemetry {
                        let labels = self.labels.clone().with_tool(call.name.clone());
                        telemetry.record("tool_failure", labels, json!({"error": err.kind()}));
                        telemetry.record_failure(
                            format!("tool::{}", call.name),
                            err.to_string(),
                            0,
                            self.labels.clone().with_tool(call.name.clone()),
                        );
                    }
                    results.push(Message::tool_error(&call.id, error_payload(&err)));
                }
            }
        }
        Ok(results)
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutput> {
        debug!(tool = %call.name, id = %call.id, "dispatching tool call");
        if let Some(telemetry) = self.telemetry {
            telemetry.record(
                "tool_call",
                self.labels.clone().with_tool(call.name.clone()),
                json!({"id": call.id}),
            );
        }
        let pending = self.tools.call(&call.name, call.arguments_value());
        match self.tool_timeout {
            Some(after) => tokio::time::timeout(after, pending)
                .await
                .unwrap_or_else(|_| {
                    Err(ConciergeError::Timeout {
                        what: format!("tool `{}`", call.name),
                        after,
                    })
                }),
            None => pending.await,
        }
    }
}

/// A named assistant: one parameterization of the tool-calling loop.
pub struct Agent {
    name: String,
    description: String,
    prompt: PromptTemplate,
    model: Arc<dyn LanguageModel>,
    tools: ToolRegistry,
    step_budget: usize,
    model_timeout: Option<Duration>,
    tool_timeout: Option<Duration>,
    timezone: Tz,
    parallel_tools: bool,
    telemetry: Option<TelemetryCollector>,
    metrics: Option<MetricsTracker>,
}

impl Agent {
    pub fn new(name: impl Into<String>, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            prompt: PromptTemplate::new("You are a helpful assistant."),
            model,
            tools: ToolRegistry::new(),
            step_budget: 10,
            model_timeout: None,
            tool_timeout: None,
            timezone: chrono_tz::UTC,
            parallel_tools: true,
            telemetry: None,
            metrics: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<PromptTemplate>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Zero is accepted here and rejected when the agent is invoked.
    pub fn with_step_budget(mut self, step_budget: usize) -> Self {
        self.step_budget = step_budget;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = Some(timeout);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_parallel_tools(mut self, parallel: bool) -> Self {
        self.parallel_tools = parallel;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsTracker) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    pub fn step_budget(&self) -> usize {
        self.step_budget
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout
    }

    pub fn system_prompt(&self) -> &PromptTemplate {
        &self.prompt
    }

    pub async fn invoke(&self, messages: Vec<Message>) -> Result<RunOutcome> {
        self.invoke_with_cancel(messages, &CancellationToken::new())
            .await
    }

    /// Like [`Agent::invoke`], but stops with [`ConciergeError::Cancelled`]
    /// as soon as `cancel` fires. Nothing from an interrupted tool batch is
    /// kept.
    pub async fn invoke_with_cancel(
        &self,
        messages: Vec<Message>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let system_prompt = self.prompt.render_now(self.timezone);
        let runner = LoopRunner {
            tools: &self.tools,
            model: self.model.as_ref(),
            model_timeout: self.model_timeout,
            tool_timeout: self.tool_timeout,
            parallel_tools: self.parallel_tools,
            cancel,
            telemetry: self.telemetry.as_ref(),
            labels: TelemetryLabels::agent(self.name.clone()),
        };
        let mut guard = self.metrics.as_ref().map(|m| m.start_run(self.name.clone()));

        let result = runner
            .run(messages, &system_prompt, self.step_budget, &mut guard)
            .await;
        if let Some(guard) = guard {
            guard.finish(result.as_ref().ok().map(|outcome| outcome.stop_reason));
        }
        if let Err(err) = &result {
            warn!(agent = %self.name, error = %err, "agent invocation failed");
        }
        result
    }

    /// Single-turn convenience: run on one user message and return the
    /// final assistant text.
    pub async fn respond(&self, user_input: impl Into<String>) -> Result<String> {
        let outcome = self.invoke(vec![Message::user(user_input)]).await?;
        Ok(outcome.final_text().unwrap_or_default())
    }
}
