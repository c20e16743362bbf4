use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{ConciergeError, Result};

/// What a tool hands back: either plain text or a structured mapping that
/// carries at least a `status` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Text(String),
    Structured(Map<String, Value>),
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        ToolOutput::Text(text.into())
    }

    /// Build a structured output from a `json!` object. Non-object values are
    /// wrapped under `result`.
    pub fn structured(value: Value) -> Self {
        match value {
            Value::Object(map) => ToolOutput::Structured(map),
            other => {
                let mut map = Map::new();
                map.insert("result".into(), other);
                ToolOutput::Structured(map)
            }
        }
    }

    pub fn status(&self) -> Option<&str> {
        match self {
            ToolOutput::Structured(map) => map.get("status").and_then(Value::as_str),
            ToolOutput::Text(_) => None,
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            ToolOutput::Text(text) => Value::String(text),
            ToolOutput::Structured(map) => Value::Object(map),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, input: Value) -> Result<ToolOutput>;
}

/// Static description of a tool, as declared to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

fn tool_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").expect("static regex"))
}

/// Name → tool mapping. Names are validated and must be unique, so a lookup
/// miss at dispatch time only ever means the model asked for something absent.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if !tool_name_pattern().is_match(&name) {
            return Err(ConciergeError::InvalidToolName(name));
        }
        if self.tools.contains_key(&name) {
            return Err(ConciergeError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Fold another registry into this one, rejecting name clashes.
    pub fn merge(&mut self, other: ToolRegistry) -> Result<()> {
        for (_, tool) in other.tools {
            self.register_arc(tool)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> = self
            .tools
            .values()
            .map(|tool| ToolDescription {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect();

        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }

    pub async fn call(&self, name: &str, input: Value) -> Result<ToolOutput> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ConciergeError::ToolNotFound(name.to_string()))?;
        tool.call(input).await.map_err(|err| match err {
            ConciergeError::ToolInvocation { .. } | ConciergeError::InvalidArguments { .. } => err,
            other => ConciergeError::tool_failure(name, other),
        })
    }
}

/// Deserialize a tool's argument object into its typed input.
pub fn parse_args<T: DeserializeOwned>(tool: &str, input: Value) -> Result<T> {
    serde_json::from_value(input).map_err(|err| ConciergeError::InvalidArguments {
        tool: tool.to_string(),
        reason: err.to_string(),
    })
}

type ToolFuture = Pin<Box<dyn Future<Output = Result<ToolOutput>> + Send>>;

/// A tool backed by a closure.
pub struct FnTool {
    name: String,
    description: String,
    parameters: Value,
    handler: Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(move |input| Box::pin(handler(input))),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        (self.handler)(input).await
    }
}
