use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{ConciergeError, Result};
use crate::prompts::parse_timezone;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
}

/// Which models the assistants use and how to reach their providers.
/// Model names are written as `provider/model-name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelsConfig {
    #[serde(default = "default_supervisor_model")]
    pub supervisor: String,
    #[serde(default = "default_sub_assistant_model")]
    pub sub_assistant: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub openai: ProviderConfig,
    #[serde(default)]
    pub azure_openai: ProviderConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            supervisor: default_supervisor_model(),
            sub_assistant: default_sub_assistant_model(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout(),
            openai: ProviderConfig::default(),
            azure_openai: ProviderConfig {
                api_version: Some("2025-01-01-preview".into()),
                ..ProviderConfig::default()
            },
        }
    }
}

fn default_supervisor_model() -> String {
    "azure_openai/gpt-4.1".into()
}

fn default_sub_assistant_model() -> String {
    "azure_openai/gpt-4.1-mini".into()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_request_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_assistant_step_budget")]
    pub assistant_step_budget: usize,
    #[serde(default = "default_supervisor_step_budget")]
    pub supervisor_step_budget: usize,
    #[serde(default)]
    pub model_timeout_secs: Option<u64>,
    /// Bounds each tool call made by a sub-assistant.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: Option<u64>,
    /// Bounds each `transfer_to_*` call a supervisor makes, which covers
    /// the whole nested run.
    #[serde(default = "default_delegation_timeout")]
    pub delegation_timeout_secs: Option<u64>,
    #[serde(default = "default_parallel_tools")]
    pub parallel_tools: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            assistant_step_budget: default_assistant_step_budget(),
            supervisor_step_budget: default_supervisor_step_budget(),
            model_timeout_secs: None,
            tool_timeout_secs: default_tool_timeout(),
            delegation_timeout_secs: default_delegation_timeout(),
            parallel_tools: default_parallel_tools(),
        }
    }
}

impl AgentConfig {
    pub fn model_timeout(&self) -> Option<Duration> {
        self.model_timeout_secs.map(Duration::from_secs)
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }

    pub fn delegation_timeout(&self) -> Option<Duration> {
        self.delegation_timeout_secs.map(Duration::from_secs)
    }
}

fn default_assistant_step_budget() -> usize {
    12
}

fn default_supervisor_step_budget() -> usize {
    7
}

fn default_tool_timeout() -> Option<u64> {
    Some(60)
}

fn default_delegation_timeout() -> Option<u64> {
    Some(300)
}

fn default_parallel_tools() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    #[serde(default)]
    pub tavily_api_key: Option<String>,
    #[serde(default = "default_tavily_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            endpoint: default_tavily_endpoint(),
            max_results: default_max_results(),
        }
    }
}

fn default_tavily_endpoint() -> String {
    "https://api.tavily.com".into()
}

fn default_max_results() -> usize {
    10
}

/// Work-request service used by the EAM assistant. Credentials come from
/// the config file or `CONCIERGE_EAM_*` variables only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EamConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_eam_system_name")]
    pub system_name: String,
    #[serde(default = "default_eam_requested_by")]
    pub requested_by: String,
    /// Model used to classify requests; the sub-assistant model when unset.
    #[serde(default)]
    pub classifier_model: Option<String>,
}

impl Default for EamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            username: None,
            password: None,
            system_name: default_eam_system_name(),
            requested_by: default_eam_requested_by(),
            classifier_model: None,
        }
    }
}

fn default_eam_system_name() -> String {
    "CZZREQASST".into()
}

fn default_eam_requested_by() -> String {
    "HEC".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub eam: EamConfig,
    /// System prompt overrides keyed by assistant name.
    #[serde(default)]
    pub prompts: BTreeMap<String, String>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_timezone() -> String {
    "Australia/Brisbane".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            models: ModelsConfig::default(),
            agent: AgentConfig::default(),
            search: SearchConfig::default(),
            eam: EamConfig::default(),
            prompts: BTreeMap::new(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| ConciergeError::Config(format!("Failed to parse configuration: {err}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let mut cfg: Self = toml::from_str(&raw)
            .map_err(|err| ConciergeError::Config(format!("Failed to parse configuration: {err}")))?;
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_overrides(|key| env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `CONCIERGE_*` overrides read through `lookup`. Values that do
    /// not parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut Option<String>, key: &str| {
            if let Some(value) = lookup(key) {
                *target = Some(value);
            }
        };
        set(&mut self.models.openai.api_key, "CONCIERGE_OPENAI_API_KEY");
        set(&mut self.models.openai.endpoint, "CONCIERGE_OPENAI_ENDPOINT");
        set(&mut self.models.openai.organization, "CONCIERGE_OPENAI_ORG");
        set(&mut self.models.azure_openai.api_key, "CONCIERGE_AZURE_OPENAI_API_KEY");
        set(&mut self.models.azure_openai.endpoint, "CONCIERGE_AZURE_OPENAI_ENDPOINT");
        set(&mut self.models.azure_openai.api_version, "CONCIERGE_AZURE_OPENAI_API_VERSION");
        set(&mut self.search.tavily_api_key, "CONCIERGE_TAVILY_API_KEY");
        set(&mut self.eam.base_url, "CONCIERGE_EAM_BASE_URL");
        set(&mut self.eam.api_key, "CONCIERGE_EAM_API_KEY");
        set(&mut self.eam.username, "CONCIERGE_EAM_USERNAME");
        set(&mut self.eam.password, "CONCIERGE_EAM_PASSWORD");

        if let Some(timezone) = lookup("CONCIERGE_TIMEZONE") {
            self.timezone = timezone;
        }
        if let Some(model) = lookup("CONCIERGE_SUPERVISOR_MODEL") {
            self.models.supervisor = model;
        }
        if let Some(model) = lookup("CONCIERGE_SUB_ASSISTANT_MODEL") {
            self.models.sub_assistant = model;
        }
        if let Some(host) = lookup("CONCIERGE_HOST") {
            self.server.host = host;
        }
        if let Some(Ok(port)) = lookup("CONCIERGE_PORT").map(|v| v.parse::<u16>()) {
            self.server.port = port;
        }
        if let Some(Ok(budget)) = lookup("CONCIERGE_ASSISTANT_STEP_BUDGET").map(|v| v.parse::<usize>()) {
            self.agent.assistant_step_budget = budget;
        }
        if let Some(Ok(budget)) = lookup("CONCIERGE_SUPERVISOR_STEP_BUDGET").map(|v| v.parse::<usize>()) {
            self.agent.supervisor_step_budget = budget;
        }
        if let Some(Ok(secs)) = lookup("CONCIERGE_TOOL_TIMEOUT_SECS").map(|v| v.parse::<u64>()) {
            self.agent.tool_timeout_secs = Some(secs);
        }
        if let Some(Ok(secs)) = lookup("CONCIERGE_DELEGATION_TIMEOUT_SECS").map(|v| v.parse::<u64>()) {
            self.agent.delegation_timeout_secs = Some(secs);
        }
        if let Some(level) = lookup("CONCIERGE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(Ok(json)) = lookup("CONCIERGE_LOG_JSON").map(|v| v.parse::<bool>()) {
            self.logging.json = json;
        }
    }

    pub fn validate(&self) -> Result<()> {
        parse_timezone(&self.timezone)?;
        if self.agent.assistant_step_budget == 0 {
            return Err(ConciergeError::InvalidStepBudget(0));
        }
        if self.agent.supervisor_step_budget == 0 {
            return Err(ConciergeError::InvalidStepBudget(0));
        }
        if !(0.0..=2.0).contains(&self.models.temperature) {
            return Err(ConciergeError::Config(format!(
                "temperature {} is outside 0.0..=2.0",
                self.models.temperature
            )));
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.timezone)
    }

    pub fn prompt_override(&self, assistant: &str) -> Option<&str> {
        self.prompts.get(assistant).map(String::as_str)
    }
}
