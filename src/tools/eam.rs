//! Enterprise asset management: work-request creation.
//!
//! A request is first classified (type and priority codes) by a model, then
//! saved through the EAM internal API. The API reply is turned into a
//! `status` payload for the assistant; transport problems never escape as
//! errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::EamConfig;
use crate::error::{ConciergeError, Result};
use crate::llm::{LanguageModel, ModelResponse};
use crate::message::Message;
use crate::tool::{parse_args, Tool, ToolOutput, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestType {
    #[serde(rename = "CLEAN")]
    Cleaning,
    #[serde(rename = "ELECT")]
    ElectricalFault,
    #[serde(rename = "GRAF")]
    Graffiti,
    #[serde(rename = "PAINT")]
    Painting,
    #[serde(rename = "NA")]
    NotApplicable,
}

impl RequestType {
    pub fn code(self) -> &'static str {
        match self {
            RequestType::Cleaning => "CLEAN",
            RequestType::ElectricalFault => "ELECT",
            RequestType::Graffiti => "GRAF",
            RequestType::Painting => "PAINT",
            RequestType::NotApplicable => "NA",
        }
    }

    /// Unknown codes classify as not applicable.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "CLEAN" => RequestType::Cleaning,
            "ELECT" => RequestType::ElectricalFault,
            "GRAF" => RequestType::Graffiti,
            "PAINT" => RequestType::Painting,
            _ => RequestType::NotApplicable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Priority {
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "MED")]
    Medium,
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "NA")]
    NotApplicable,
}

impl Priority {
    pub fn code(self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MED",
            Priority::Low => "LOW",
            Priority::NotApplicable => "NA",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Priority::High,
            "MED" | "MEDIUM" => Priority::Medium,
            "LOW" => Priority::Low,
            _ => Priority::NotApplicable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub request_type: RequestType,
    pub priority: Priority,
}

#[async_trait]
pub trait WorkRequestClassifier: Send + Sync {
    async fn classify(&self, description: &str, details: &str) -> Result<Classification>;
}

/// Asks a chat model for the request type and priority as a JSON object.
pub struct ModelClassifier {
    model: Arc<dyn LanguageModel>,
}

impl ModelClassifier {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn prompt(description: &str, details: &str) -> String {
        format!(
            "Based on the work request description and details, determine the most appropriate request type and priority level.

Description: {description}
Details: {details}

Available Request Types:
- CLEAN: Cleaning
- ELECT: Electrical Fault
- GRAF: Graffiti
- PAINT: Painting
- NA: Not Applicable

Available Priority Levels:
- HIGH: High
- MED: Medium
- LOW: Low
- NA: Not Applicable

Reply with only a JSON object of the form {{\"request_type\": \"<code>\", \"priority\": \"<code>\"}}."
        )
    }
}

#[derive(Deserialize)]
struct RawClassification {
    request_type: String,
    priority: String,
}

/// Pull a classification out of free model text that contains a JSON object.
pub fn parse_classification(text: &str) -> Result<Classification> {
    let start = text.find('{');
    let end = text.rfind('}');
    let raw = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => {
            return Err(ConciergeError::MalformedResponse(format!(
                "classifier reply has no JSON object: `{text}`"
            )))
        }
    };
    let parsed: RawClassification = serde_json::from_str(raw).map_err(|err| {
        ConciergeError::MalformedResponse(format!("classifier reply is not a classification: {err}"))
    })?;
    Ok(Classification {
        request_type: RequestType::from_code(&parsed.request_type),
        priority: Priority::from_code(&parsed.priority),
    })
}

#[async_trait]
impl WorkRequestClassifier for ModelClassifier {
    async fn classify(&self, description: &str, details: &str) -> Result<Classification> {
        let response = self
            .model
            .complete_chat(&[Message::user(Self::prompt(description, details))], &[])
            .await?;
        match response {
            ModelResponse::Final { text } => parse_classification(&text),
            ModelResponse::ToolCalls { .. } => Err(ConciergeError::MalformedResponse(
                "classifier requested tools instead of answering".into(),
            )),
        }
    }
}

/// Client for the work-request save service.
pub struct EamClient {
    http: reqwest::Client,
    config: EamConfig,
}

impl EamClient {
    pub fn from_config(config: &EamConfig) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            config: config.clone(),
        })
    }

    fn save_url(&self) -> Result<String> {
        let base = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| ConciergeError::Config("EAM base_url is not configured".into()))?;
        Ok(format!(
            "{}?appName=WorkRequests&serviceName=WorkRequest.WorkRequestService&serviceMethod=Save",
            base.trim_end_matches('/')
        ))
    }

    pub fn request_body(&self, description: &str, details: &str, class: Classification) -> Value {
        json!({
            "Items": [{
                "WorkRequestSystemName": self.config.system_name,
                "Description": description,
                "Details": details,
                "RequestTypeCode": class.request_type.code(),
                "PriorityCode": class.priority.code(),
                "RequestedBy": self.config.requested_by,
            }]
        })
    }

    /// POST the work request and return the raw response body.
    pub async fn save(&self, description: &str, details: &str, class: Classification) -> Result<String> {
        let mut request = self
            .http
            .post(self.save_url()?)
            .json(&self.request_body(description, details, class));
        if let Some(api_key) = &self.config.api_key {
            request = request.header("x-t1-api-key", api_key);
        }
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }
        let response = request.send().await?;
        Ok(response.text().await?)
    }
}

/// Turn the service reply into a status payload.
pub fn interpret_response(api_response: &str, class: Classification) -> Value {
    let outcome = |status: &str, message: String| {
        json!({
            "status": status,
            "message": message,
            "request_type": class.request_type.code(),
            "priority": class.priority.code(),
            "api_response": api_response,
        })
    };

    let parsed: Value = match serde_json::from_str(api_response) {
        Ok(parsed) => parsed,
        Err(_) => {
            return outcome(
                "error",
                "Work request creation failed: Invalid API response format".into(),
            )
        }
    };
    let first = parsed.get("Items").and_then(|items| items.get(0));

    let errors: Vec<&str> = first
        .and_then(|item| item.get("Messages"))
        .and_then(Value::as_array)
        .map(|messages| {
            messages
                .iter()
                .filter(|m| m.get("NotificationType").and_then(Value::as_str) == Some("Error"))
                .filter_map(|m| m.get("Message").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if !errors.is_empty() {
        return outcome(
            "error",
            format!("Work request creation failed: {}", errors.join("; ")),
        );
    }

    let number = first
        .and_then(|item| item.get("WorkRequestNumber"))
        .filter(|n| !n.is_null() && n.as_str() != Some(""));
    match number {
        Some(Value::String(number)) => outcome(
            "success",
            format!("Work request created successfully with number {number}"),
        ),
        Some(number) => outcome(
            "success",
            format!("Work request created successfully with number {number}"),
        ),
        None => outcome(
            "error",
            "Work request creation failed: Unexpected response format".into(),
        ),
    }
}

pub fn eam_toolkit(
    client: Arc<EamClient>,
    classifier: Arc<dyn WorkRequestClassifier>,
) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(CreateWorkRequestTool { client, classifier })?;
    Ok(registry)
}

struct CreateWorkRequestTool {
    client: Arc<EamClient>,
    classifier: Arc<dyn WorkRequestClassifier>,
}

#[derive(Debug, Deserialize)]
struct CreateWorkRequestInput {
    description: String,
    details: String,
}

#[async_trait]
impl Tool for CreateWorkRequestTool {
    fn name(&self) -> &str {
        "create_work_request"
    }

    fn description(&self) -> &str {
        "Create a work request in the EAM system. The request type and priority are classified automatically."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {"type": "string", "description": "Brief description of the work request"},
                "details": {"type": "string", "description": "Detailed information about the work request"}
            },
            "required": ["description", "details"]
        })
    }

    async fn call(&self, input: Value) -> Result<ToolOutput> {
        let args: CreateWorkRequestInput = parse_args(self.name(), input)?;

        let class = match self.classifier.classify(&args.description, &args.details).await {
            Ok(class) => class,
            Err(err) => return Ok(unexpected(err)),
        };
        tracing::info!(
            request_type = class.request_type.code(),
            priority = class.priority.code(),
            "classified work request"
        );

        match self.client.save(&args.description, &args.details, class).await {
            Ok(body) => Ok(ToolOutput::structured(interpret_response(&body, class))),
            Err(err) => Ok(unexpected(err)),
        }
    }
}

fn unexpected(err: ConciergeError) -> ToolOutput {
    tracing::warn!(error = %err, "work request creation failed");
    ToolOutput::structured(json!({
        "status": "error",
        "message": format!("An error occurred: {err}"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubModel;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ELECTRICAL_HIGH: Classification = Classification {
        request_type: RequestType::ElectricalFault,
        priority: Priority::High,
    };

    struct FixedClassifier(Classification);

    #[async_trait]
    impl WorkRequestClassifier for FixedClassifier {
        async fn classify(&self, _description: &str, _details: &str) -> Result<Classification> {
            Ok(self.0)
        }
    }

    fn config(base_url: Option<String>) -> EamConfig {
        EamConfig {
            base_url,
            api_key: Some("key-123".into()),
            username: Some("svc".into()),
            password: Some("pw".into()),
            ..EamConfig::default()
        }
    }

    #[test]
    fn interprets_service_replies() {
        let ok = interpret_response(r#"{"Items":[{"WorkRequestNumber":"WR0042"}]}"#, ELECTRICAL_HIGH);
        assert_eq!(ok["status"], "success");
        assert_eq!(ok["message"], "Work request created successfully with number WR0042");
        assert_eq!(ok["request_type"], "ELECT");
        assert_eq!(ok["priority"], "HIGH");

        let failed = interpret_response(
            r#"{"Items":[{"Messages":[
                {"NotificationType":"Error","Message":"Asset missing"},
                {"NotificationType":"Info","Message":"ignored"},
                {"NotificationType":"Error","Message":"Location invalid"}]}]}"#,
            ELECTRICAL_HIGH,
        );
        assert_eq!(failed["status"], "error");
        assert_eq!(failed["message"], "Work request creation failed: Asset missing; Location invalid");

        let odd = interpret_response(r#"{"Items":[]}"#, ELECTRICAL_HIGH);
        assert_eq!(odd["message"], "Work request creation failed: Unexpected response format");

        let garbage = interpret_response("<html>", ELECTRICAL_HIGH);
        assert_eq!(garbage["message"], "Work request creation failed: Invalid API response format");
        assert_eq!(garbage["api_response"], "<html>");
    }

    #[test]
    fn parses_classifier_text() {
        let class = parse_classification("Sure: {\"request_type\": \"graf\", \"priority\": \"LOW\"}").unwrap();
        assert_eq!(class.request_type, RequestType::Graffiti);
        assert_eq!(class.priority, Priority::Low);

        let unknown = parse_classification(r#"{"request_type":"PLUMB","priority":"URGENT"}"#).unwrap();
        assert_eq!(unknown.request_type, RequestType::NotApplicable);
        assert_eq!(unknown.priority, Priority::NotApplicable);

        assert!(parse_classification("no idea").is_err());
    }

    #[tokio::test]
    async fn model_classifier_reads_final_text() {
        let model = StubModel::new(vec![ModelResponse::text(r#"{"request_type":"CLEAN","priority":"MED"}"#)]);
        let class = ModelClassifier::new(model.clone())
            .classify("Spill in lobby", "Coffee on the carpet near reception")
            .await
            .unwrap();
        assert_eq!(class.request_type, RequestType::Cleaning);
        assert_eq!(class.priority, Priority::Medium);
        assert!(model.seen_messages()[0][0].text().contains("Spill in lobby"));
    }

    #[tokio::test]
    async fn posts_work_request_with_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/Service"))
            .and(query_param("appName", "WorkRequests"))
            .and(query_param("serviceName", "WorkRequest.WorkRequestService"))
            .and(query_param("serviceMethod", "Save"))
            .and(header("x-t1-api-key", "key-123"))
            .and(header("authorization", "Basic c3ZjOnB3"))
            .and(body_partial_json(json!({"Items": [{
                "WorkRequestSystemName": "CZZREQASST",
                "Description": "Light out",
                "RequestTypeCode": "ELECT",
                "PriorityCode": "HIGH",
                "RequestedBy": "HEC"
            }]})))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Items":[{"WorkRequestNumber":"WR77"}]}"#))
            .mount(&server)
            .await;

        let client = Arc::new(EamClient::from_config(&config(Some(format!("{}/Service", server.uri())))).unwrap());
        let tools = eam_toolkit(client, Arc::new(FixedClassifier(ELECTRICAL_HIGH))).unwrap();
        let output = tools
            .call(
                "create_work_request",
                json!({"description": "Light out", "details": "Level 3 corridor light is flickering"}),
            )
            .await
            .unwrap()
            .into_value();

        assert_eq!(output["status"], "success");
        assert_eq!(output["message"], "Work request created successfully with number WR77");
    }

    #[tokio::test]
    async fn unconfigured_service_reports_error_payload() {
        let client = Arc::new(EamClient::from_config(&config(None)).unwrap());
        let tools = eam_toolkit(client, Arc::new(FixedClassifier(ELECTRICAL_HIGH))).unwrap();
        let output = tools
            .call("create_work_request", json!({"description": "x", "details": "y"}))
            .await
            .unwrap();
        assert_eq!(output.status(), Some("error"));
    }
}
