//! Tool-calling assistants with supervisor delegation.
//!
//! The crate provides:
//! - A language model abstraction (`LanguageModel`) with an OpenAI-compatible client.
//! - A tool interface (`Tool` and `ToolRegistry`) plus the travel and enterprise toolkits.
//! - An `Agent` that loops between the model and its tools under a step budget.
//! - A `Supervisor` that exposes other agents as `transfer_to_<name>` tools.
//! - A `Catalog` of the configured assistants and an optional HTTP server.

pub mod agent;
pub mod assistants;
pub mod config;
pub mod error;
pub mod llm;
pub mod message;
pub mod metrics;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod supervisor;
pub mod telemetry;
pub mod tool;
pub mod tools;

pub use agent::{
    model_view, normalize_call_ids, route_after_model, run, Agent, ConversationState, LoopState,
    RunOutcome, StopReason, STEP_LIMIT_FALLBACK,
};
pub use assistants::{AssistantContext, AssistantKind, Catalog};
pub use config::{
    AgentConfig, AppConfig, EamConfig, LoggingConfig, ModelsConfig, ProviderConfig, SearchConfig,
    ServerConfig,
};
pub use error::{ConciergeError, Result};
pub use llm::{load_chat_model, LanguageModel, ModelResponse, ModelSpec, OpenAIClient, StubModel};
pub use message::{last_assistant_text, Message, ToolCall};
pub use metrics::{MetricsTracker, RunGuard, RunReport};
pub use prompts::{current_time, parse_timezone, PromptTemplate};
#[cfg(feature = "server")]
pub use server::{AssistantServer, InvokeRequest, InvokeResponse};
pub use supervisor::{AgentTool, Supervisor};
pub use telemetry::{
    init_tracing, FailureRecord, RetryPolicy, RetryingModel, TelemetryCollector, TelemetryEvent,
    TelemetryLabels,
};
pub use tool::{parse_args, FnTool, Tool, ToolDescription, ToolOutput, ToolRegistry};
