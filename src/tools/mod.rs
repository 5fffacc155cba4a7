//! External capability clients: web search/extract/scrape and LLM inference.

pub mod firecrawl;
pub mod llm;

pub use firecrawl::{FirecrawlClient, WebExtract, WebScrape, WebSearch};
pub use llm::{GenerateRequest, LanguageModel, RigClient};

use anyhow::Result;
use std::sync::Arc;

/// The capability set a research run depends on.
///
/// Everything behind these handles is replaceable, which is how the
/// integration tests script entire runs without network access.
#[derive(Clone)]
pub struct Capabilities {
    pub search: Arc<dyn WebSearch>,
    pub extract: Arc<dyn WebExtract>,
    pub scrape: Arc<dyn WebScrape>,
    pub llm: Arc<dyn LanguageModel>,
}

impl Capabilities {
    /// Wire the production clients from the environment.
    pub fn from_env() -> Result<Self> {
        let firecrawl = Arc::new(FirecrawlClient::from_env()?);
        let llm = Arc::new(RigClient::from_env()?);
        Ok(Self {
            search: firecrawl.clone(),
            extract: firecrawl.clone(),
            scrape: firecrawl,
            llm,
        })
    }
}
