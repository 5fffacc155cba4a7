//! Web search / extract / scrape capabilities backed by the Firecrawl API.

use crate::error::ResearchError;
use crate::models::SearchResult;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.firecrawl.dev";

/// Ranked web search. An empty result list is a success, not a failure.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ResearchError>;
}

/// Prompt-directed structured extraction over one or more URLs.
///
/// The payload shape varies by provider (string, list of items, object);
/// normalization into findings happens in the extractor, so this returns
/// the raw JSON data.
#[async_trait]
pub trait WebExtract: Send + Sync {
    async fn extract(&self, urls: &[String], prompt: &str) -> Result<Value, ResearchError>;
}

/// Plain page fetch returning markdown.
#[async_trait]
pub trait WebScrape: Send + Sync {
    async fn scrape(&self, url: &str) -> Result<String, ResearchError>;
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Vec<SearchResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    urls: &'a [String],
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: &'a [&'a str],
}

#[derive(Debug, Deserialize)]
struct ScrapeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: ScrapeData,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ScrapeData {
    #[serde(default)]
    markdown: String,
}

/// reqwest client for the Firecrawl search/extract/scrape endpoints.
pub struct FirecrawlClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FirecrawlClient {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("FIRECRAWL_API_KEY")
            .map_err(|_| anyhow::anyhow!("FIRECRAWL_API_KEY not set"))?;
        let base_url =
            env::var("FIRECRAWL_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        Ok(Self::new(api_key, base_url))
    }

    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ResearchError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ResearchError::Capability(format!("request to {path} failed: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| ResearchError::Capability(format!("bad response from {path}: {e}")))
    }
}

#[async_trait]
impl WebSearch for FirecrawlClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ResearchError> {
        let body = SearchRequest { query, limit: 10 };
        let response: SearchResponse = self.post("/v1/search", &body).await?;
        if !response.success {
            return Err(ResearchError::SearchTransient(
                response.error.unwrap_or_else(|| "search failed".to_string()),
            ));
        }
        Ok(response.data)
    }
}

#[async_trait]
impl WebExtract for FirecrawlClient {
    async fn extract(&self, urls: &[String], prompt: &str) -> Result<Value, ResearchError> {
        let body = ExtractRequest { urls, prompt };
        let response: ExtractResponse = self.post("/v1/extract", &body).await?;
        if !response.success {
            return Err(ResearchError::Capability(
                response
                    .error
                    .unwrap_or_else(|| "extract failed".to_string()),
            ));
        }
        Ok(response.data)
    }
}

#[async_trait]
impl WebScrape for FirecrawlClient {
    async fn scrape(&self, url: &str) -> Result<String, ResearchError> {
        let body = ScrapeRequest {
            url,
            formats: &["markdown"],
        };
        let response: ScrapeResponse = self.post("/v1/scrape", &body).await?;
        if !response.success {
            return Err(ResearchError::Capability(
                response.error.unwrap_or_else(|| "scrape failed".to_string()),
            ));
        }
        Ok(response.data.markdown)
    }
}
