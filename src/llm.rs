//! Language model boundary: the trait the agent loop calls, the tagged
//! response it gets back, and the providers behind it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::{ModelsConfig, ProviderConfig};
use crate::error::{ConciergeError, Result};
use crate::message::{Message, ToolCall};
use crate::tool::ToolDescription;

/// One model turn: either a final answer or a request to run tools.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelResponse {
    Final { text: String },
    ToolCalls { text: String, calls: Vec<ToolCall> },
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        ModelResponse::Final { text: text.into() }
    }

    pub fn calls(calls: Vec<ToolCall>) -> Self {
        Self::from_parts(None, calls)
    }

    /// Single tool call with no accompanying text.
    pub fn call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::calls(vec![ToolCall::new(id, name, arguments)])
    }

    pub fn from_parts(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        let text = content.unwrap_or_default();
        if calls.is_empty() {
            ModelResponse::Final { text }
        } else {
            ModelResponse::ToolCalls { text, calls }
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        matches!(self, ModelResponse::ToolCalls { .. })
    }

    pub fn into_message(self) -> Message {
        match self {
            ModelResponse::Final { text } => Message::assistant(text),
            ModelResponse::ToolCalls { text, calls } => Message::assistant_with_calls(text, calls),
        }
    }
}

/// Minimal abstraction around a chat completion provider bound to a tool set.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelResponse>;
}

#[async_trait]
impl<T: LanguageModel + ?Sized> LanguageModel for Arc<T> {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelResponse> {
        (**self).complete_chat(messages, tools).await
    }
}

/// `provider/model` pair, e.g. `azure_openai/gpt-4.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

impl ModelSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once('/') {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => Ok(Self {
                provider: provider.to_string(),
                model: model.to_string(),
            }),
            _ => Err(ConciergeError::Config(format!(
                "model `{raw}` must be written as provider/model-name"
            ))),
        }
    }
}

/// Build a chat model from a fully specified `provider/model` name.
pub fn load_chat_model(raw: &str, models: &ModelsConfig) -> Result<Arc<dyn LanguageModel>> {
    let spec = ModelSpec::parse(raw)?;
    let client = match spec.provider.as_str() {
        "openai" => OpenAIClient::openai(&spec.model, &models.openai, models)?,
        "azure_openai" => OpenAIClient::azure(&spec.model, &models.azure_openai, models)?,
        other => {
            return Err(ConciergeError::Config(format!(
                "unsupported model provider `{other}`"
            )))
        }
    };
    Ok(Arc::new(client))
}

fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> ConciergeError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return ConciergeError::RateLimited(format!("{provider}: {body}"));
    }
    ConciergeError::LanguageModel(format!("{provider} request failed with {status}: {body}"))
}

#[derive(Debug, Clone)]
enum Flavor {
    OpenAi { organization: Option<String> },
    Azure { api_version: String },
}

/// Chat completions client for OpenAI and Azure OpenAI deployments.
#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    temperature: f32,
    flavor: Flavor,
}

impl OpenAIClient {
    pub fn openai(model: &str, provider: &ProviderConfig, models: &ModelsConfig) -> Result<Self> {
        let api_key = provider.api_key.clone().ok_or_else(|| {
            ConciergeError::Config("missing OpenAI API key in model config".into())
        })?;
        let base_url = provider
            .endpoint
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Self::build(
            model,
            api_key,
            base_url,
            models,
            Flavor::OpenAi {
                organization: provider.organization.clone(),
            },
        )
    }

    pub fn azure(model: &str, provider: &ProviderConfig, models: &ModelsConfig) -> Result<Self> {
        let api_key = provider.api_key.clone().ok_or_else(|| {
            ConciergeError::Config("missing Azure OpenAI API key in model config".into())
        })?;
        let base_url = provider.endpoint.clone().ok_or_else(|| {
            ConciergeError::Config("missing Azure OpenAI endpoint in model config".into())
        })?;
        let api_version = provider
            .api_version
            .clone()
            .unwrap_or_else(|| "2025-01-01-preview".to_string());
        Self::build(model, api_key, base_url, models, Flavor::Azure { api_version })
    }

    fn build(
        model: &str,
        api_key: String,
        base_url: String,
        models: &ModelsConfig,
        flavor: Flavor,
    ) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(models.request_timeout_secs))
                .build()
                .map_err(|err| ConciergeError::Config(format!("http client error: {err}")))?,
            model: model.to_string(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            temperature: models.temperature,
            flavor,
        })
    }

    fn url(&self) -> String {
        match &self.flavor {
            Flavor::OpenAi { .. } => format!("{}/chat/completions", self.base_url),
            Flavor::Azure { api_version } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, self.model, api_version
            ),
        }
    }

    fn to_openai_messages(messages: &[Message]) -> Vec<OpenAiMessage> {
        messages
            .iter()
            .map(|message| match message {
                Message::System { text } => OpenAiMessage::plain("system", text),
                Message::User { text } => OpenAiMessage::plain("user", text),
                Message::Assistant { text, tool_calls } => OpenAiMessage {
                    role: "assistant".into(),
                    content: if text.is_empty() && !tool_calls.is_empty() {
                        None
                    } else {
                        Some(text.clone())
                    },
                    tool_call_id: None,
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(
                            tool_calls
                                .iter()
                                .map(|call| OpenAiToolCall {
                                    id: Some(call.id.clone()),
                                    r#type: "function".into(),
                                    function: OpenAiFunctionCall {
                                        name: call.name.clone(),
                                        arguments: call.arguments_value().to_string(),
                                    },
                                })
                                .collect(),
                        )
                    },
                },
                Message::ToolResult { tool_call_id, .. } => OpenAiMessage {
                    role: "tool".into(),
                    content: Some(message.text()),
                    tool_call_id: Some(tool_call_id.clone()),
                    tool_calls: None,
                },
            })
            .collect()
    }

    fn to_openai_tools(tools: &[ToolDescription]) -> Option<Vec<OpenAiTool>> {
        if tools.is_empty() {
            return None;
        }

        Some(
            tools
                .iter()
                .map(|tool| OpenAiTool {
                    r#type: "function".to_string(),
                    function: OpenAiFunction {
                        name: tool.name.clone(),
                        description: Some(tool.description.clone()),
                        parameters: Some(tool.parameters.clone()),
                    },
                })
                .collect(),
        )
    }

    fn parse_arguments(call: &OpenAiToolCall) -> Result<Map<String, Value>> {
        let raw = call.function.arguments.trim();
        if raw.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ConciergeError::MalformedResponse(format!(
                "arguments for `{}` must be a JSON object, got {other}",
                call.function.name
            ))),
            Err(err) => Err(ConciergeError::MalformedResponse(format!(
                "arguments for `{}` are not valid JSON: {err}",
                call.function.name
            ))),
        }
    }
}

#[async_trait]
impl LanguageModel for OpenAIClient {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelResponse> {
        let mut payload = json!({
            "messages": Self::to_openai_messages(messages),
            "temperature": self.temperature,
        });
        if let Some(tools) = Self::to_openai_tools(tools) {
            payload["tools"] = serde_json::to_value(tools)?;
            payload["tool_choice"] = Value::String("auto".into());
        }

        let mut builder = self.http.post(self.url());
        builder = match &self.flavor {
            Flavor::OpenAi { organization } => {
                payload["model"] = Value::String(self.model.clone());
                let builder = builder.header(
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {}", self.api_key),
                );
                match organization {
                    Some(org) => builder.header("OpenAI-Organization", org),
                    None => builder,
                }
            }
            Flavor::Azure { .. } => builder.header("api-key", &self.api_key),
        };

        let resp = builder
            .json(&payload)
            .send()
            .await
            .map_err(|err| ConciergeError::LanguageModel(format!("OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "openai"));
        }

        let body: OpenAiResponse = resp.json().await.map_err(|err| {
            ConciergeError::MalformedResponse(format!("OpenAI response parse error: {err}"))
        })?;

        let first = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ConciergeError::MalformedResponse("OpenAI returned no choices".into()))?;

        let mut tool_calls = Vec::new();
        for call in first.message.tool_calls.unwrap_or_default() {
            let arguments = Self::parse_arguments(&call)?;
            tool_calls.push(ToolCall {
                id: call
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
                name: call.function.name,
                arguments,
            });
        }

        Ok(ModelResponse::from_parts(first.message.content, tool_calls))
    }
}

/// A deterministic model used for tests and demos. Replays scripted
/// responses in order and records every conversation it was shown.
pub struct StubModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    repeat: Option<ModelResponse>,
    seen: Mutex<Vec<(Vec<Message>, Vec<ToolDescription>)>>,
    calls: AtomicUsize,
}

impl StubModel {
    pub fn new(responses: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            repeat: None,
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    /// A model that answers every call with the same response.
    pub fn repeating(response: ModelResponse) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            repeat: Some(response),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen_messages(&self) -> Vec<Vec<Message>> {
        self.seen
            .lock()
            .map(|seen| seen.iter().map(|(messages, _)| messages.clone()).collect())
            .unwrap_or_default()
    }

    pub fn seen_tools(&self) -> Vec<Vec<ToolDescription>> {
        self.seen
            .lock()
            .map(|seen| seen.iter().map(|(_, tools)| tools.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn complete_chat(
        &self,
        messages: &[Message],
        tools: &[ToolDescription],
    ) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((messages.to_vec(), tools.to_vec()));
        }
        let next = self
            .responses
            .lock()
            .map_err(|_| ConciergeError::LanguageModel("stub model poisoned".into()))?
            .pop_front();
        next.or_else(|| self.repeat.clone()).ok_or_else(|| {
            ConciergeError::LanguageModel("StubModel ran out of scripted responses".into())
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

impl OpenAiMessage {
    fn plain(role: &str, text: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(text.to_string()),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    r#type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(endpoint: &str) -> ProviderConfig {
        ProviderConfig {
            api_key: Some("test_api_key".into()),
            endpoint: Some(endpoint.to_string()),
            organization: None,
            api_version: Some("2025-01-01-preview".into()),
        }
    }

    #[test]
    fn parses_model_specs() {
        let spec = ModelSpec::parse("azure_openai/gpt-4.1-mini").unwrap();
        assert_eq!(spec.provider, "azure_openai");
        assert_eq!(spec.model, "gpt-4.1-mini");
        assert!(ModelSpec::parse("gpt-4").is_err());
        assert!(load_chat_model("mystery/model", &ModelsConfig::default()).is_err());
    }

    #[tokio::test]
    async fn completes_with_tool_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test_api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_123",
                            "type": "function",
                            "function": {
                                "name": "search_flights",
                                "arguments": "{\"origin\":\"NYC\",\"destination\":\"LA\"}"
                            }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let client = OpenAIClient::openai(
            "gpt-4o-mini",
            &provider(&format!("{}/v1", server.uri())),
            &ModelsConfig::default(),
        )
        .unwrap();
        let response = client
            .complete_chat(&[Message::user("fly me to LA")], &[])
            .await
            .unwrap();

        match response {
            ModelResponse::ToolCalls { calls, .. } => {
                assert_eq!(calls[0].id, "call_123");
                assert_eq!(calls[0].name, "search_flights");
                assert_eq!(calls[0].arguments["origin"], "NYC");
            }
            other => panic!("expected tool calls, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn azure_uses_deployment_url_and_api_key_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4.1/chat/completions"))
            .and(query_param("api-version", "2025-01-01-preview"))
            .and(header("api-key", "test_api_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Hello!"}}]
            })))
            .mount(&server)
            .await;

        let client =
            OpenAIClient::azure("gpt-4.1", &provider(&server.uri()), &ModelsConfig::default())
                .unwrap();
        let response = client
            .complete_chat(&[Message::user("hi")], &[])
            .await
            .unwrap();
        assert_eq!(response, ModelResponse::text("Hello!"));
    }

    #[tokio::test]
    async fn maps_rate_limits_and_bad_arguments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/limited/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/broken/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": null, "tool_calls": [{
                    "id": "c1", "type": "function",
                    "function": {"name": "book_flight", "arguments": "{not json"}
                }]}}]
            })))
            .mount(&server)
            .await;

        let models = ModelsConfig::default();
        let limited =
            OpenAIClient::openai("m", &provider(&format!("{}/limited", server.uri())), &models)
                .unwrap();
        let err = limited
            .complete_chat(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ConciergeError::RateLimited(_)));

        let broken =
            OpenAIClient::openai("m", &provider(&format!("{}/broken", server.uri())), &models)
                .unwrap();
        let err = broken
            .complete_chat(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ConciergeError::MalformedResponse(_)));
    }

    #[test]
    fn converts_conversation_to_wire_format() {
        let messages = vec![
            Message::system("be brief"),
            Message::assistant_with_calls(
                "",
                vec![ToolCall::new("c1", "get_invoice", json!({"invoice_id": "9"}))],
            ),
            Message::tool_result("c1", json!({"status": "success"})),
        ];
        let wire = serde_json::to_value(OpenAIClient::to_openai_messages(&messages)).unwrap();
        assert_eq!(wire[0]["role"], "system");
        assert!(wire[1].get("content").is_none());
        assert_eq!(wire[1]["tool_calls"][0]["function"]["arguments"], r#"{"invoice_id":"9"}"#);
        assert_eq!(wire[2]["tool_call_id"], "c1");
        assert_eq!(wire[2]["content"], r#"{"status":"success"}"#);
    }

    #[tokio::test]
    async fn stub_model_replays_then_fails() {
        let stub = StubModel::new(vec![ModelResponse::text("one")]);
        assert_eq!(
            stub.complete_chat(&[], &[]).await.unwrap(),
            ModelResponse::text("one")
        );
        assert!(stub.complete_chat(&[], &[]).await.is_err());
        assert_eq!(stub.call_count(), 2);
    }
}
