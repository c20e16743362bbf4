use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::Agent;
use crate::error::{ConciergeError, Result};
use crate::llm::LanguageModel;
use crate::message::Message;
use crate::metrics::MetricsTracker;
use crate::prompts::supervisor_prompt;
use crate::telemetry::TelemetryCollector;
use crate::tool::{parse_args, Tool, ToolOutput, ToolRegistry};

#[derive(Debug, Deserialize)]
struct TransferArgs {
    request: String,
    #[serde(default)]
    context: Option<String>,
}

/// Exposes a whole agent as a tool. Each call runs a fresh conversation on
/// the nested agent and hands back its final answer untouched.
pub struct AgentTool {
    name: String,
    description: String,
    agent: Arc<Agent>,
}

impl AgentTool {
    pub fn new(agent: Arc<Agent>) -> Self {
        let description = if agent.description().is_empty() {
            format!("Hand the request over to {}.", agent.name())
        } else {
            format!("Hand the request over to {}: {}", agent.name(), agent.description())
        };
        Self {
            name: Self::tool_name(agent.name()),
            description,
            agent,
        }
    }

    pub fn tool_name(agent_name: &str) -> String {
        format!("transfer_to_{agent_name}")
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request": {
                    "type": "string",
                    "description": "The user's request, restated completely for the assistant."
                },
                "context": {
                    "type": "string",
                    "description": "Earlier details from the conversation the assistant needs."
                }
            },
            "required": ["request"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: TransferArgs = parse_args(&self.name, input)?;
        let text = match args.context.filter(|context| !context.trim().is_empty()) {
            Some(context) => format!("{}\n\nContext: {context}", args.request),
            None => args.request,
        };
        let outcome = self
            .agent
            .invoke(vec![Message::user(text)])
            .await
            .map_err(|err| ConciergeError::tool_failure(&self.name, err))?;
        Ok(ToolOutput::text(outcome.final_text().unwrap_or_default()))
    }
}

/// Builds a routing agent over a set of member agents.
pub struct Supervisor {
    name: String,
    role: String,
    description: String,
    model: Arc<dyn LanguageModel>,
    members: BTreeMap<String, Arc<Agent>>,
    step_budget: usize,
    timezone: Tz,
    model_timeout: Option<Duration>,
    delegation_timeout: Option<Duration>,
    telemetry: Option<TelemetryCollector>,
    metrics: Option<MetricsTracker>,
}

impl Supervisor {
    pub fn new(name: impl Into<String>, model: Arc<dyn LanguageModel>) -> Self {
        let name = name.into();
        Self {
            role: format!("You are {name}, a team supervisor managing a set of assistants."),
            name,
            description: String::new(),
            model,
            members: BTreeMap::new(),
            step_budget: 7,
            timezone: chrono_tz::UTC,
            model_timeout: None,
            delegation_timeout: None,
            telemetry: None,
            metrics: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_member(mut self, agent: impl Into<Arc<Agent>>) -> Self {
        let agent = agent.into();
        self.members.insert(agent.name().to_string(), agent);
        self
    }

    pub fn with_step_budget(mut self, step_budget: usize) -> Self {
        self.step_budget = step_budget;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = Some(timeout);
        self
    }

    /// Upper bound on one `transfer_to_*` call, nested run included. A
    /// member that overruns it shows up as a `timeout` error result.
    pub fn with_delegation_timeout(mut self, timeout: Duration) -> Self {
        self.delegation_timeout = Some(timeout);
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

    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// Member names in routing order.
    pub fn member_names(&self) -> Vec<&str> {
        self.members.keys().map(String::as_str).collect()
    }

    pub fn build(self) -> Result<Agent> {
        let mut tools = ToolRegistry::new();
        let mut roster = Vec::with_capacity(self.members.len());
        for (name, agent) in &self.members {
            roster.push((name.clone(), agent.description().to_string()));
            tools.register(AgentTool::new(Arc::clone(agent)))?;
        }

        let prompt = supervisor_prompt(&self.role, &roster, self.timezone);
        let mut agent = Agent::new(self.name, self.model)
            .with_description(self.description)
            .with_system_prompt(prompt)
            .with_tools(tools)
            .with_step_budget(self.step_budget)
            .with_timezone(self.timezone);
        if let Some(timeout) = self.model_timeout {
            agent = agent.with_model_timeout(timeout);
        }
        if let Some(timeout) = self.delegation_timeout {
            agent = agent.with_tool_timeout(timeout);
        }
        if let Some(telemetry) = self.telemetry {
            agent = agent.with_telemetry(telemetry);
        }
        if let Some(metrics) = self.metrics {
            agent = agent.with_metrics(metrics);
        }
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelResponse, StubModel};

    #[tokio::test]
    async fn agent_tool_passes_request_and_context() {
        let nested = StubModel::new(vec![ModelResponse::text("Invoice #7 - Amount: $1,000")]);
        let tool = AgentTool::new(Arc::new(
            Agent::new("finance_assistant", nested.clone()).with_description("Invoices"),
        ));

        assert_eq!(tool.name(), "transfer_to_finance_assistant");
        let output = tool
            .call(json!({"request": "Get invoice 7", "context": "User is in Brisbane"}))
            .await
            .unwrap();

        assert_eq!(output, ToolOutput::text("Invoice #7 - Amount: $1,000"));
        let seen = nested.seen_messages();
        assert_eq!(
            seen[0][1],
            Message::user("Get invoice 7\n\nContext: User is in Brisbane")
        );
    }

    #[tokio::test]
    async fn nested_model_failures_become_tool_failures() {
        let tool = AgentTool::new(Arc::new(Agent::new("search_assistant", StubModel::new(vec![]))));
        let err = tool.call(json!({"request": "find"})).await.unwrap_err();
        assert!(matches!(err, ConciergeError::ToolInvocation { ref name, .. } if name == "transfer_to_search_assistant"));
    }

    #[test]
    fn builds_supervisor_with_transfer_tools() {
        let supervisor = Supervisor::new("travel_master", StubModel::new(vec![]))
            .with_member(Agent::new("flight_assistant", StubModel::new(vec![])).with_description("Flights"))
            .with_member(Agent::new("car_rental_assistant", StubModel::new(vec![])));
        assert_eq!(supervisor.member_names(), vec!["car_rental_assistant", "flight_assistant"]);

        let agent = supervisor.build().unwrap();
        assert_eq!(
            agent.tools().names(),
            vec!["transfer_to_car_rental_assistant", "transfer_to_flight_assistant"]
        );
        assert!(agent.system_prompt().as_str().contains("- transfer_to_flight_assistant: Flights"));
        assert_eq!(agent.step_budget(), 7);
        assert_eq!(agent.tool_timeout(), None);
    }

    #[tokio::test]
    async fn delegation_timeout_bounds_nested_runs() {
        let mut slow_tools = ToolRegistry::new();
        slow_tools
            .register(crate::tool::FnTool::new(
                "search_flights",
                "Never finishes in time",
                json!({"type": "object"}),
                |_| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(ToolOutput::text("late"))
                },
            ))
            .unwrap();
        let member = Agent::new(
            "flight_assistant",
            StubModel::repeating(ModelResponse::call("f", "search_flights", json!({}))),
        )
        .with_tools(slow_tools);
        let top = StubModel::new(vec![
            ModelResponse::call("t", "transfer_to_flight_assistant", json!({"request": "flights"})),
            ModelResponse::text("The flight assistant took too long."),
        ]);
        let agent = Supervisor::new("travel_master", top)
            .with_member(member)
            .with_delegation_timeout(Duration::from_millis(30))
            .build()
            .unwrap();
        assert_eq!(agent.tool_timeout(), Some(Duration::from_millis(30)));

        let outcome = agent.invoke(vec![Message::user("flights please")]).await.unwrap();

        match &outcome.messages[2] {
            Message::ToolResult { content, is_error, .. } => {
                assert!(is_error);
                assert_eq!(content["error"], "timeout");
            }
            other => panic!("expected tool result, got {other:?}"),
        }
        assert_eq!(
            outcome.final_text().as_deref(),
            Some("The flight assistant took too long.")
        );
    }
}
