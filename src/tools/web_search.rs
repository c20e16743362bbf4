//! Web search backends used by the travel search tools.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::SearchConfig;
use crate::error::{ConciergeError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>>;
}

/// Tavily search API client.
#[derive(Clone)]
pub struct TavilyClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl TavilyClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &SearchConfig) -> Result<Self> {
        let api_key = config
            .tavily_api_key
            .clone()
            .ok_or_else(|| ConciergeError::Config("missing Tavily API key".into()))?;
        Self::new(config.endpoint.clone(), api_key)
    }
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[async_trait]
impl SearchBackend for TavilyClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        let resp = self
            .http
            .post(format!("{}/search", self.endpoint))
            .json(&json!({
                "api_key": self.api_key,
                "query": query,
                "max_results": max_results,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ConciergeError::Protocol(format!(
                "search request failed with {status}: {body}"
            )));
        }

        let body: TavilyResponse = resp.json().await?;
        Ok(body.results.into_iter().take(max_results).collect())
    }
}

/// Stand-in used when no search API key is configured. Every search fails,
/// which the travel tools report as an error payload.
pub struct UnconfiguredSearch;

#[async_trait]
impl SearchBackend for UnconfiguredSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchResult>> {
        Err(ConciergeError::Config(
            "web search is not configured; set search.tavily_api_key".into(),
        ))
    }
}

/// Returns the same results for every query. For tests and offline demos.
#[derive(Clone, Default)]
pub struct StaticSearch {
    results: Vec<SearchResult>,
}

impl StaticSearch {
    pub fn new(results: Vec<SearchResult>) -> Self {
        Self { results }
    }
}

#[async_trait]
impl SearchBackend for StaticSearch {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        Ok(self.results.iter().take(max_results).cloned().collect())
    }
}
