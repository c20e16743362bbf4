//! The concrete assistants and the supervisors that route between them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::config::AppConfig;
use crate::error::{ConciergeError, Result};
use crate::llm::{load_chat_model, LanguageModel};
use crate::metrics::MetricsTracker;
use crate::prompts;
use crate::supervisor::Supervisor;
use crate::telemetry::{RetryPolicy, RetryingModel, TelemetryCollector};
use crate::tool::ToolRegistry;
use crate::tools::{
    accommodation_toolkit, car_rental_toolkit, eam_toolkit, finance_toolkit, flight_toolkit,
    search_toolkit, EamClient, ModelClassifier, SearchBackend, TavilyClient, UnconfiguredSearch,
    WorkRequestClassifier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantKind {
    Eam,
    Search,
    Finance,
    Flight,
    Accommodation,
    CarRental,
    PlusAssistant,
    TravelMaster,
}

impl AssistantKind {
    pub const ALL: [AssistantKind; 8] = [
        AssistantKind::Eam,
        AssistantKind::Search,
        AssistantKind::Finance,
        AssistantKind::Flight,
        AssistantKind::Accommodation,
        AssistantKind::CarRental,
        AssistantKind::PlusAssistant,
        AssistantKind::TravelMaster,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AssistantKind::Eam => "eam_assistant",
            AssistantKind::Search => "search_assistant",
            AssistantKind::Finance => "finance_assistant",
            AssistantKind::Flight => "flight_assistant",
            AssistantKind::Accommodation => "accommodation_assistant",
            AssistantKind::CarRental => "car_rental_assistant",
            AssistantKind::PlusAssistant => "plus_assistant",
            AssistantKind::TravelMaster => "travel_master",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn description(self) -> &'static str {
        match self {
            AssistantKind::Eam => "Creates work requests in the EAM system.",
            AssistantKind::Search => "Finds destination URLs in the CiA system.",
            AssistantKind::Finance => "Looks up invoice details.",
            AssistantKind::Flight => "Searches, books, cancels and changes flight reservations.",
            AssistantKind::Accommodation => {
                "Searches, books, cancels and changes hotel and lodging reservations."
            }
            AssistantKind::CarRental => "Searches, books, cancels and changes car rental reservations.",
            AssistantKind::PlusAssistant => "Supervises the EAM, search and finance assistants.",
            AssistantKind::TravelMaster => {
                "Supervises the flight, accommodation and car rental assistants."
            }
        }
    }

    pub fn is_supervisor(self) -> bool {
        matches!(self, AssistantKind::PlusAssistant | AssistantKind::TravelMaster)
    }
}

/// Shared collaborators every assistant is built from.
pub struct AssistantContext {
    config: AppConfig,
    timezone: Tz,
    supervisor_model: Arc<dyn LanguageModel>,
    sub_assistant_model: Arc<dyn LanguageModel>,
    search: Arc<dyn SearchBackend>,
    eam_client: Arc<EamClient>,
    classifier: Arc<dyn WorkRequestClassifier>,
    telemetry: TelemetryCollector,
    metrics: MetricsTracker,
}

impl AssistantContext {
    /// Resolve models, search and EAM clients from configuration. Model
    /// calls are retried on transient failures.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let telemetry = TelemetryCollector::default();
        let retrying = |raw: &str| -> Result<Arc<dyn LanguageModel>> {
            let model = load_chat_model(raw, &config.models)?;
            Ok(Arc::new(
                RetryingModel::new(model, RetryPolicy::default_external_call())
                    .with_telemetry(telemetry.clone()),
            ))
        };
        let supervisor = retrying(&config.models.supervisor)?;
        let sub_assistant = retrying(&config.models.sub_assistant)?;
        let classifier_model = match &config.eam.classifier_model {
            Some(raw) => retrying(raw)?,
            None => Arc::clone(&sub_assistant),
        };

        let mut context = Self::with_models(config, supervisor, sub_assistant)?;
        context.classifier = Arc::new(ModelClassifier::new(classifier_model));
        context.telemetry = telemetry;
        Ok(context)
    }

    /// Build around explicit models; the sub-assistant model also classifies
    /// work requests.
    pub fn with_models(
        config: AppConfig,
        supervisor_model: Arc<dyn LanguageModel>,
        sub_assistant_model: Arc<dyn LanguageModel>,
    ) -> Result<Self> {
        config.validate()?;
        let timezone = config.timezone()?;
        let search: Arc<dyn SearchBackend> = match &config.search.tavily_api_key {
            Some(_) => Arc::new(TavilyClient::from_config(&config.search)?),
            None => {
                tracing::warn!("no search API key configured; travel searches will report errors");
                Arc::new(UnconfiguredSearch)
            }
        };
        let eam_client = Arc::new(EamClient::from_config(&config.eam)?);
        let classifier = Arc::new(ModelClassifier::new(Arc::clone(&sub_assistant_model)));

        Ok(Self {
            config,
            timezone,
            supervisor_model,
            sub_assistant_model,
            search,
            eam_client,
            classifier,
            telemetry: TelemetryCollector::default(),
            metrics: MetricsTracker::default(),
        })
    }

    pub fn with_search(mut self, search: Arc<dyn SearchBackend>) -> Self {
        self.search = search;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn WorkRequestClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &TelemetryCollector {
        &self.telemetry
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    fn prompt(&self, kind: AssistantKind, default: String) -> String {
        self.config
            .prompt_override(kind.name())
            .map(str::to_string)
            .unwrap_or(default)
    }

    fn assistant(&self, kind: AssistantKind, tools: ToolRegistry, prompt: String) -> Agent {
        let agent_cfg = &self.config.agent;
        let mut agent = Agent::new(kind.name(), Arc::clone(&self.sub_assistant_model))
            .with_description(kind.description())
            .with_system_prompt(self.prompt(kind, prompt))
            .with_tools(tools)
            .with_step_budget(agent_cfg.assistant_step_budget)
            .with_timezone(self.timezone)
            .with_parallel_tools(agent_cfg.parallel_tools)
            .with_telemetry(self.telemetry.clone())
            .with_metrics(self.metrics.clone());
        if let Some(timeout) = agent_cfg.model_timeout() {
            agent = agent.with_model_timeout(timeout);
        }
        if let Some(timeout) = agent_cfg.tool_timeout() {
            agent = agent.with_tool_timeout(timeout);
        }
        agent
    }

    fn supervisor(&self, kind: AssistantKind, role: &str, members: Vec<Arc<Agent>>) -> Result<Agent> {
        let mut builder = Supervisor::new(kind.name(), Arc::clone(&self.supervisor_model))
            .with_role(role)
            .with_description(kind.description())
            .with_step_budget(self.config.agent.supervisor_step_budget)
            .with_timezone(self.timezone)
            .with_telemetry(self.telemetry.clone())
            .with_metrics(self.metrics.clone());
        if let Some(timeout) = self.config.agent.model_timeout() {
            builder = builder.with_model_timeout(timeout);
        }
        if let Some(timeout) = self.config.agent.delegation_timeout() {
            builder = builder.with_delegation_timeout(timeout);
        }
        for member in members {
            builder = builder.with_member(member);
        }
        let agent = builder.build()?;
        Ok(match self.config.prompt_override(kind.name()) {
            Some(text) => agent.with_system_prompt(text),
            None => agent,
        })
    }

    pub fn eam_assistant(&self) -> Result<Agent> {
        let tools = eam_toolkit(Arc::clone(&self.eam_client), Arc::clone(&self.classifier))?;
        Ok(self.assistant(AssistantKind::Eam, tools, prompts::EAM_ASSISTANT.into()))
    }

    pub fn search_assistant(&self) -> Result<Agent> {
        Ok(self.assistant(AssistantKind::Search, search_toolkit()?, prompts::SEARCH_ASSISTANT.into()))
    }

    pub fn finance_assistant(&self) -> Result<Agent> {
        Ok(self.assistant(AssistantKind::Finance, finance_toolkit()?, prompts::FINANCE_ASSISTANT.into()))
    }

    pub fn flight_assistant(&self) -> Result<Agent> {
        let tools = flight_toolkit(Arc::clone(&self.search), self.config.search.max_results)?;
        Ok(self.assistant(AssistantKind::Flight, tools, prompts::flight_assistant()))
    }

    pub fn accommodation_assistant(&self) -> Result<Agent> {
        let tools = accommodation_toolkit(Arc::clone(&self.search), self.config.search.max_results)?;
        Ok(self.assistant(AssistantKind::Accommodation, tools, prompts::accommodation_assistant()))
    }

    pub fn car_rental_assistant(&self) -> Result<Agent> {
        let tools = car_rental_toolkit(Arc::clone(&self.search), self.config.search.max_results)?;
        Ok(self.assistant(AssistantKind::CarRental, tools, prompts::car_rental_assistant()))
    }

    pub fn plus_assistant(&self, members: Vec<Arc<Agent>>) -> Result<Agent> {
        self.supervisor(
            AssistantKind::PlusAssistant,
            "You are the Plus Assistant, a team supervisor managing an EAM assistant, a search assistant and a finance assistant. You can use all the assistants to answer the user's question.",
            members,
        )
    }

    pub fn travel_master(&self, members: Vec<Arc<Agent>>) -> Result<Agent> {
        self.supervisor(
            AssistantKind::TravelMaster,
            "You are the Travel Master, a team supervisor managing a flight assistant, an accommodation assistant and a car rental assistant. You can use all the assistants to help users plan and book their travel.",
            members,
        )
    }
}

/// Every assistant by name, ready to invoke.
#[derive(Clone)]
pub struct Catalog {
    agents: BTreeMap<String, Arc<Agent>>,
}

impl Catalog {
    pub fn build(context: &AssistantContext) -> Result<Self> {
        let eam = Arc::new(context.eam_assistant()?);
        let search = Arc::new(context.search_assistant()?);
        let finance = Arc::new(context.finance_assistant()?);
        let flight = Arc::new(context.flight_assistant()?);
        let accommodation = Arc::new(context.accommodation_assistant()?);
        let car_rental = Arc::new(context.car_rental_assistant()?);

        let plus = Arc::new(context.plus_assistant(vec![
            Arc::clone(&eam),
            Arc::clone(&search),
            Arc::clone(&finance),
        ])?);
        let travel = Arc::new(context.travel_master(vec![
            Arc::clone(&flight),
            Arc::clone(&accommodation),
            Arc::clone(&car_rental),
        ])?);

        let agents = [eam, search, finance, flight, accommodation, car_rental, plus, travel]
            .into_iter()
            .map(|agent| (agent.name().to_string(), agent))
            .collect();
        Ok(Self { agents })
    }

    pub fn get(&self, name: &str) -> Option<Arc<Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn require(&self, name: &str) -> Result<Arc<Agent>> {
        self.get(name)
            .ok_or_else(|| ConciergeError::Config(format!("unknown assistant `{name}`")))
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Agent>> {
        self.agents.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubModel;

    fn context() -> AssistantContext {
        let mut config = AppConfig::default();
        config.prompts.insert("finance_assistant".into(), "Custom finance. {system_time}".into());
        AssistantContext::with_models(config, StubModel::new(vec![]), StubModel::new(vec![])).unwrap()
    }

    #[test]
    fn kinds_round_trip_names() {
        for kind in AssistantKind::ALL {
            assert_eq!(AssistantKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(AssistantKind::from_name("nobody"), None);
        assert!(AssistantKind::TravelMaster.is_supervisor());
    }

    #[test]
    fn catalog_holds_every_assistant() {
        let catalog = Catalog::build(&context()).unwrap();
        assert_eq!(catalog.len(), 8);

        let travel = catalog.get("travel_master").unwrap();
        assert_eq!(
            travel.tools().names(),
            vec![
                "transfer_to_accommodation_assistant",
                "transfer_to_car_rental_assistant",
                "transfer_to_flight_assistant",
            ]
        );
        assert_eq!(travel.step_budget(), 7);
        assert_eq!(travel.tool_timeout(), Some(std::time::Duration::from_secs(300)));
        assert!(travel.system_prompt().as_str().contains("(Australia/Brisbane)"));

        let flight = catalog.get("flight_assistant").unwrap();
        assert_eq!(
            flight.tools().names(),
            vec!["book_flight", "cancel_flight", "change_flight", "search_flights"]
        );
        assert_eq!(flight.step_budget(), 12);
        assert_eq!(flight.tool_timeout(), Some(std::time::Duration::from_secs(60)));

        let plus = catalog.get("plus_assistant").unwrap();
        assert_eq!(plus.tools().len(), 3);
        assert!(catalog.require("mystery").is_err());
    }

    #[test]
    fn prompt_overrides_apply() {
        let catalog = Catalog::build(&context()).unwrap();
        let finance = catalog.get("finance_assistant").unwrap();
        assert_eq!(finance.system_prompt().as_str(), "Custom finance. {system_time}");
        let search = catalog.get("search_assistant").unwrap();
        assert_eq!(search.system_prompt().as_str(), prompts::SEARCH_ASSISTANT);
    }

    #[test]
    fn from_config_requires_provider_credentials() {
        let err = AssistantContext::from_config(AppConfig::default()).err().unwrap();
        assert_eq!(err.kind(), "config");
    }
}
