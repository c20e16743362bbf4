use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::agent::StopReason;
use crate::assistants::Catalog;
use crate::error::ConciergeError;
use crate::message::Message;
use crate::Result;

/// HTTP front end over a [`Catalog`].
#[derive(Clone)]
pub struct AssistantServer {
    catalog: Arc<Catalog>,
    events: broadcast::Sender<String>,
}

impl AssistantServer {
    pub fn new(catalog: Catalog) -> Self {
        let (tx, _) = broadcast::channel(512);
        Self {
            catalog: Arc::new(catalog),
            events: tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/assistants", get(list_assistants))
            .route("/assistants/:name/invoke", post(invoke_assistant))
            .route("/events", get(stream_events))
            .with_state(self.clone())
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, assistants = self.catalog.len(), "serving assistants");
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await
            .map_err(|err| ConciergeError::Protocol(format!("server error: {err}")))?;
        Ok(())
    }
}

#[derive(Serialize)]
struct AssistantSummary {
    name: String,
    description: String,
    tools: Vec<String>,
    step_budget: usize,
}

async fn list_assistants(State(state): State<AssistantServer>) -> impl IntoResponse {
    let payload: Vec<AssistantSummary> = state
        .catalog
        .iter()
        .map(|agent| AssistantSummary {
            name: agent.name().to_string(),
            description: agent.description().to_string(),
            tools: agent.tools().names(),
            step_budget: agent.step_budget(),
        })
        .collect();
    Json(payload)
}

async fn stream_events(
    State(state): State<AssistantServer>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(line) => Some(Ok::<Event, Infallible>(Event::default().data(line))),
            Err(_) => None,
        }
    });
    Sse::new(stream)
}

/// Either a full conversation, a single user message, or both (the message
/// is appended).
#[derive(Debug, Default, Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InvokeResponse {
    pub messages: Vec<Message>,
    pub stop_reason: StopReason,
    pub final_text: Option<String>,
}

async fn invoke_assistant(
    State(state): State<AssistantServer>,
    Path(name): Path<String>,
    Json(req): Json<InvokeRequest>,
) -> Response {
    let Some(agent) = state.catalog.get(&name) else {
        return error_response(StatusCode::NOT_FOUND, "not_found", format!("unknown assistant `{name}`"));
    };

    let mut messages = req.messages;
    if let Some(text) = req.message {
        messages.push(Message::user(text));
    }
    if messages.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "empty_conversation",
            "provide `messages` or `message`".to_string(),
        );
    }

    match agent.invoke(messages).await {
        Ok(outcome) => {
            let _ = state
                .events
                .send(format!("{name}:{}", stop_reason_label(outcome.stop_reason)));
            let final_text = outcome.final_text();
            Json(InvokeResponse {
                messages: outcome.messages,
                stop_reason: outcome.stop_reason,
                final_text,
            })
            .into_response()
        }
        Err(err) => {
            let _ = state.events.send(format!("{name}:error:{}", err.kind()));
            error_response(status_for(&err), err.kind(), err.to_string())
        }
    }
}

fn stop_reason_label(reason: StopReason) -> &'static str {
    match reason {
        StopReason::FinalAnswer => "final_answer",
        StopReason::StepLimit => "step_limit",
    }
}

fn status_for(err: &ConciergeError) -> StatusCode {
    match err {
        ConciergeError::InvalidStepBudget(_) | ConciergeError::InvalidArguments { .. } => {
            StatusCode::BAD_REQUEST
        }
        ConciergeError::LanguageModel(_)
        | ConciergeError::RateLimited(_)
        | ConciergeError::MalformedResponse(_)
        | ConciergeError::Http(_)
        | ConciergeError::Protocol(_) => StatusCode::BAD_GATEWAY,
        ConciergeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ConciergeError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, kind: &str, message: String) -> Response {
    (status, Json(json!({"error": kind, "message": message}))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistants::AssistantContext;
    use crate::config::AppConfig;
    use crate::llm::{ModelResponse, StubModel};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    fn server(sub: Arc<StubModel>) -> AssistantServer {
        let context =
            AssistantContext::with_models(AppConfig::default(), StubModel::new(vec![]), sub).unwrap();
        AssistantServer::new(Catalog::build(&context).unwrap())
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_and_listing() {
        let app = server(StubModel::new(vec![])).router();
        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/assistants").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let listed = body_json(response).await;
        let names: Vec<&str> = listed
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"travel_master"));
    }

    #[tokio::test]
    async fn invokes_finance_assistant() {
        let sub = StubModel::new(vec![
            ModelResponse::call("c1", "get_invoice", json!({"invoice_id": "777"})),
            ModelResponse::Final {
                text: "Invoice 777 is paid.".into(),
            },
        ]);
        let server = server(sub);
        let mut events = server.subscribe();
        let response = server
            .router()
            .oneshot(post(
                "/assistants/finance_assistant/invoke",
                json!({"message": "status of invoice 777?"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["stop_reason"], "final_answer");
        assert_eq!(body["final_text"], "Invoice 777 is paid.");
        assert_eq!(body["messages"].as_array().unwrap().len(), 4);
        assert_eq!(events.recv().await.unwrap(), "finance_assistant:final_answer");
    }

    #[tokio::test]
    async fn maps_errors_to_statuses() {
        let app = server(StubModel::new(vec![])).router();
        let response = app
            .clone()
            .oneshot(post("/assistants/nobody/invoke", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(post("/assistants/search_assistant/invoke", json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // the stub has nothing scripted, so the model call fails
        let response = app
            .oneshot(post("/assistants/search_assistant/invoke", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_json(response).await["error"], "model_invocation");
    }
}
