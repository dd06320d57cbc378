//! Fact lookup: short encyclopedia facts for a classifier label
//!
//! Queries the MediaWiki Action API in two steps:
//! - **search**: `list=search` for the label, keep the top hit's title
//! - **extract**: `prop=extracts` (intro only, plain text) for that title
//!
//! The extract is split naively on `". "` into at most `max_facts` entries.
//! Lookup never fails: any transport, status or shape problem degrades to
//! the single sentinel fact.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::FactsConfig;
use crate::models::{FactList, SearchResult};

/// Default cap on the number of facts returned.
pub const DEFAULT_MAX_FACTS: usize = 10;

/// Returned in place of real facts when none can be retrieved.
pub const SENTINEL_FACT: &str = "No relevant facts found.";

// ============================================================================
// FactSource trait
// ============================================================================

/// Abstraction over fact providers.
#[async_trait]
pub trait FactSource: Send + Sync {
    /// Look up at most `max_facts` facts for `query`. Always non-empty.
    async fn lookup_facts(&self, query: &str, max_facts: usize) -> FactList;

    /// Where the facts come from, for health output and logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Reasons a lookup fell back to the sentinel.
#[derive(Error, Debug)]
pub enum FactsError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned HTTP {status}")]
    Api { status: u16 },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Empty query")]
    EmptyQuery,

    #[error("No search results for {query:?}")]
    NoResults { query: String },

    #[error("No usable extract for {title:?}")]
    NoExtract { title: String },
}

impl FactsError {
    /// Transport failures, 5xx and 429 are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FactsError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FactsError::Api { status } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

// ============================================================================
// Text helpers
// ============================================================================

/// Replace underscores with spaces so labels read as search terms.
pub fn normalize_query(query: &str) -> String {
    query.replace('_', " ")
}

/// Split an extract on `". "`, trim each fragment, drop empty ones and keep
/// the first `max_facts` in document order.
///
/// Deliberately naive: `"U.S. Army"` splits into `["U.S", "Army"]` and the
/// last fragment keeps its trailing period.
pub fn split_facts(extract: &str, max_facts: usize) -> Vec<String> {
    extract
        .split(". ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .take(max_facts)
        .map(str::to_string)
        .collect()
}

/// The single-entry fallback list.
pub fn sentinel_facts() -> FactList {
    FactList::new(vec![SENTINEL_FACT.to_string()])
}

// ============================================================================
// MediaWiki API structs (private)
// ============================================================================

#[derive(Debug, Deserialize)]
struct SearchResponse {
    query: SearchQuery,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    query: Option<ExtractQuery>,
}

#[derive(Debug, Deserialize)]
struct ExtractQuery {
    #[serde(default)]
    pages: BTreeMap<String, ExtractPage>,
}

#[derive(Debug, Deserialize)]
struct ExtractPage {
    #[serde(default)]
    extract: Option<String>,
}

// ============================================================================
// WikipediaClient
// ============================================================================

/// Fact source backed by the Wikipedia search and extracts APIs.
#[derive(Debug, Clone)]
pub struct WikipediaClient {
    client: Client,
    config: FactsConfig,
    base_url: String,
}

impl WikipediaClient {
    pub fn new(config: FactsConfig) -> Result<Self, FactsError> {
        let base_url = config.base_url.clone();
        Self::with_base_url(config, base_url)
    }

    /// Create a client with a custom API endpoint (for testing / mirrors)
    pub fn with_base_url(config: FactsConfig, base_url: String) -> Result<Self, FactsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Title of the highest-ranked search hit for an already normalised query.
    pub async fn search_top_title(&self, query: &str) -> Result<SearchResult, FactsError> {
        let params = [
            ("action", "query"),
            ("format", "json"),
            ("list", "search"),
            ("srsearch", query),
        ];
        let response: SearchResponse = self.get_json(&params).await?;

        response
            .query
            .search
            .into_iter()
            .next()
            .map(|hit| SearchResult { title: hit.title })
            .ok_or_else(|| FactsError::NoResults {
                query: query.to_string(),
            })
    }

    /// Plain-text intro extracts for `title`, one per returned page.
    pub async fn fetch_extracts(&self, title: &str) -> Result<Vec<String>, FactsError> {
        let params = [
            ("action", "query"),
            ("format", "json"),
            ("prop", "extracts"),
            ("exintro", "1"),
            ("explaintext", "1"),
            ("titles", title),
        ];
        let response: ExtractResponse = self.get_json(&params).await?;

        Ok(response
            .query
            .map(|q| q.pages.into_values().filter_map(|p| p.extract).collect())
            .unwrap_or_default())
    }

    async fn try_lookup(&self, query: &str, max_facts: usize) -> Result<FactList, FactsError> {
        let query = normalize_query(query);
        if query.trim().is_empty() {
            return Err(FactsError::EmptyQuery);
        }

        let top = self.search_top_title(&query).await?;
        let extracts = self.fetch_extracts(&top.title).await?;

        let facts: Vec<String> = extracts
            .iter()
            .flat_map(|extract| split_facts(extract, max_facts))
            .take(max_facts)
            .collect();

        if facts.is_empty() {
            return Err(FactsError::NoExtract { title: top.title });
        }

        tracing::debug!(query = %query, title = %top.title, count = facts.len(), "Facts retrieved");
        Ok(FactList::new(facts))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        params: &[(&str, &str)],
    ) -> Result<T, FactsError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms.max(1))
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.config.max_retries);

        RetryIf::spawn(
            retry_strategy,
            || self.get_json_once::<T>(params),
            |e: &FactsError| {
                let transient = e.is_transient();
                if transient {
                    tracing::debug!(error = %e, "Retrying Wikipedia request");
                }
                transient
            },
        )
        .await
    }

    async fn get_json_once<T: DeserializeOwned>(
        &self,
        params: &[(&str, &str)],
    ) -> Result<T, FactsError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FactsError::Api {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| FactsError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl FactSource for WikipediaClient {
    async fn lookup_facts(&self, query: &str, max_facts: usize) -> FactList {
        // A FactList is never empty, so a zero cap still yields one entry.
        let max_facts = max_facts.max(1);
        match self.try_lookup(query, max_facts).await {
            Ok(facts) => facts,
            Err(e) => {
                tracing::warn!(query = %query, error = %e, "Fact lookup degraded to sentinel");
                sentinel_facts()
            }
        }
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

// ============================================================================
// TESTS
// ============================================================================
