use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ConciergeError>;

#[derive(Debug, Error)]
pub enum ConciergeError {
    #[error("tool `{0}` not found")]
    ToolNotFound(String),

    #[error("tool `{name}` invocation failed: {source}")]
    ToolInvocation {
        name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid arguments for tool `{tool}`: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("tool `{0}` is already registered")]
    DuplicateTool(String),

    #[error("invalid tool name `{0}`: expected 1-64 characters of [a-zA-Z0-9_-]")]
    InvalidToolName(String),

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("language model rate limited: {0}")]
    RateLimited(String),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("invocation cancelled")]
    Cancelled,

    #[error("step budget must be at least 1, got {0}")]
    InvalidStepBudget(usize),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl ConciergeError {
    /// Short machine-readable tag used in tool error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ConciergeError::ToolNotFound(_) => "unknown_tool",
            ConciergeError::ToolInvocation { .. } => "tool_execution",
            ConciergeError::InvalidArguments { .. } => "invalid_arguments",
            ConciergeError::DuplicateTool(_) | ConciergeError::InvalidToolName(_) => "registration",
            ConciergeError::LanguageModel(_) => "model_invocation",
            ConciergeError::RateLimited(_) => "rate_limited",
            ConciergeError::MalformedResponse(_) => "malformed_response",
            ConciergeError::Timeout { .. } => "timeout",
            ConciergeError::Cancelled => "cancelled",
            ConciergeError::InvalidStepBudget(_) => "invalid_step_budget",
            ConciergeError::Config(_) => "config",
            ConciergeError::Protocol(_) => "protocol",
            ConciergeError::Http(_) => "http",
            ConciergeError::Io(_) => "io",
            ConciergeError::Serde(_) => "serde",
        }
    }

    /// Whether a failed model call may succeed if attempted again.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConciergeError::LanguageModel(_)
            | ConciergeError::RateLimited(_)
            | ConciergeError::Timeout { .. } => true,
            ConciergeError::Http(err) => err.is_timeout() || err.is_connect(),
            _ => false,
        }
    }

    pub(crate) fn tool_failure(
        name: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        ConciergeError::ToolInvocation {
            name: name.into(),
            source: source.into(),
        }
    }
}
