//! LLM inference capability backed by rig.

use crate::error::ResearchError;
use anyhow::Result;
use async_trait::async_trait;
use rig::completion::Prompt;
use rig::prelude::*;
use rig::providers::openai;

/// One text-generation request against a named model.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: Option<u64>,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: None,
        }
    }

    pub fn max_tokens(mut self, n: u64) -> Self {
        self.max_tokens = Some(n);
        self
    }
}

/// Text-generation capability. Model ids arrive per-request, so one client
/// serves both the routed chat model and the reasoning model.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate_text(&self, req: GenerateRequest) -> Result<String, ResearchError>;
}

/// rig-backed client for an OpenAI-compatible inference service.
pub struct RigClient {
    client: openai::Client,
}

impl RigClient {
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OpenAI API key not configured"))?;
        Ok(Self {
            client: openai::Client::new(&api_key),
        })
    }
}

#[async_trait]
impl LanguageModel for RigClient {
    async fn generate_text(&self, req: GenerateRequest) -> Result<String, ResearchError> {
        let mut builder = self.client.agent(&req.model);
        if let Some(max_tokens) = req.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        let agent = builder.build();
        agent
            .prompt(req.prompt.as_str())
            .await
            .map_err(|e| ResearchError::LlmCall(e.to_string()))
    }
}
