use std::sync::Arc;

use concierge::{
    load_chat_model, ConciergeError, LanguageModel, Message, ModelResponse, ModelsConfig,
    ProviderConfig, RetryPolicy, RetryingModel, StubModel, TelemetryCollector,
};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai_config(endpoint: &str) -> ModelsConfig {
    ModelsConfig {
        openai: ProviderConfig {
            api_key: Some("sk-test".into()),
            endpoint: Some(endpoint.into()),
            ..ProviderConfig::default()
        },
        ..ModelsConfig::default()
    }
}

#[tokio::test]
async fn loads_openai_model_from_config() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "get_invoice", "arguments": "{\"invoice_id\":\"7\"}"}
                    }]
                }
            }]
        })))
        .mount(&server)
        .await;

    let model = load_chat_model("openai/gpt-4.1-mini", &openai_config(&server.uri())).unwrap();
    let response = model
        .complete_chat(&[Message::user("invoice 7?")], &[])
        .await
        .unwrap();

    assert_eq!(
        response,
        ModelResponse::call("call_abc", "get_invoice", json!({"invoice_id": "7"}))
    );
}

#[test]
fn rejects_unknown_providers() {
    let err = load_chat_model("cohere/command-light", &ModelsConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, ConciergeError::Config(_)));
    assert!(load_chat_model("no-slash", &ModelsConfig::default()).is_err());
}

#[tokio::test]
async fn retrying_model_recovers_from_rate_limits() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello!"}}]
        })))
        .mount(&server)
        .await;

    let telemetry = TelemetryCollector::default();
    let inner = load_chat_model("openai/gpt-4.1", &openai_config(&server.uri())).unwrap();
    let policy = RetryPolicy {
        max_retries: 2,
        backoff: std::time::Duration::from_millis(1),
    };
    let model = RetryingModel::new(inner, policy).with_telemetry(telemetry.clone());

    let response = model.complete_chat(&[Message::user("hi")], &[]).await.unwrap();

    assert_eq!(response, ModelResponse::text("Hello!"));
    let (_, failures) = telemetry.drain();
    assert_eq!(failures.len(), 1);
}

#[tokio::test]
async fn stub_model_is_a_trait_object() {
    let stub = StubModel::new(vec![ModelResponse::text("scripted")]);
    let model: Arc<dyn LanguageModel> = stub.clone();
    let response = model.complete_chat(&[], &[]).await.unwrap();
    assert_eq!(response.text(), "scripted");
    assert_eq!(stub.call_count(), 1);
}
