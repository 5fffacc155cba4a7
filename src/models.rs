//! Request/response envelopes and the shared research data model.

use crate::config::ResearchConfig;
use crate::research::ranker::UrlFrequencyRanker;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_REASONING_MODEL: &str = "o3-mini";

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, rename = "modelId")]
    pub model_id: Option<String>,
    #[serde(default, rename = "reasoningModelId")]
    pub reasoning_model_id: Option<String>,
    #[serde(default, rename = "experimental_deepResearch")]
    pub experimental_deep_research: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub content: String,
}

/// Model ids resolved from the request, with service defaults.
#[derive(Debug, Clone)]
pub struct ModelIds {
    pub model: String,
    pub reasoning_model: String,
}

impl ModelIds {
    pub fn from_request(req: &ChatRequest) -> Self {
        Self {
            model: req
                .model_id
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            reasoning_model: req
                .reasoning_model_id
                .clone()
                .unwrap_or_else(|| DEFAULT_REASONING_MODEL.to_string()),
        }
    }
}

/// One hit returned by the web-search capability.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchResult {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// A `(text, source_url)` pair appended after a successful extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub text: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubAnswer {
    pub query: String,
    pub answer: String,
}

/// Aggregated occurrence record for one URL.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RankedUrl {
    pub url: String,
    pub frequency: usize,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    #[default]
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Case-insensitive parse; anything unrecognized is `Low`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" | "moderate" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Confidence::parse(&raw))
    }
}

/// The reasoning model's verdict on the current evidence.
///
/// Every field tolerates absence; [`AnalysisResult::from_value`] supplies
/// defaults so any JSON object the salvage tiers recover becomes a usable
/// record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisResult {
    pub summary: String,
    pub has_answer: bool,
    pub confidence: Confidence,
    pub gaps: Vec<String>,
    pub should_continue: bool,
    pub next_search_topic: Option<String>,
    pub url_to_search: Option<String>,
    pub subquestions: Vec<String>,
    pub sub_answer: Option<String>,
    pub last_query: Option<String>,
}

impl Default for AnalysisResult {
    fn default() -> Self {
        Self {
            summary: String::new(),
            has_answer: false,
            confidence: Confidence::Low,
            gaps: Vec::new(),
            should_continue: true,
            next_search_topic: None,
            url_to_search: None,
            subquestions: Vec::new(),
            sub_answer: None,
            last_query: None,
        }
    }
}

impl AnalysisResult {
    /// Read an analysis record out of an arbitrary JSON object.
    ///
    /// An `analysis` wrapper key is unwrapped first. Fields of the wrong
    /// type fall back to their defaults; `subquestions` keeps only string
    /// items. Returns `None` when the value is not an object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.get("analysis").unwrap_or(value);
        let map = obj.as_object()?;

        let opt_string = |key: &str| -> Option<String> {
            map.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let string_items = |key: &str| -> Vec<String> {
            map.get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };

        Some(Self {
            summary: opt_string("summary").unwrap_or_default(),
            has_answer: map
                .get("hasAnswer")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            confidence: map
                .get("confidence")
                .and_then(Value::as_str)
                .map(Confidence::parse)
                .unwrap_or_default(),
            gaps: string_items("gaps"),
            should_continue: map
                .get("shouldContinue")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            next_search_topic: opt_string("nextSearchTopic"),
            url_to_search: opt_string("urlToSearch"),
            subquestions: string_items("subquestions"),
            sub_answer: opt_string("subAnswer"),
            last_query: opt_string("lastQuery"),
        })
    }
}

/// Per-request loop state, owned by the orchestrator task and discarded on
/// return.
#[derive(Debug, Default)]
pub struct ResearchState {
    pub findings: Vec<Finding>,
    pub summaries: Vec<String>,
    pub next_search_topic: Option<String>,
    pub url_to_search: Option<String>,
    pub current_depth: usize,
    pub failed_attempts: usize,
    pub max_failed_attempts: usize,
    pub processed_urls: HashSet<String>,
    pub subquestions: VecDeque<String>,
    pub answered_subquestions: HashSet<String>,
    pub sub_answers: Vec<SubAnswer>,
    pub completed_steps: usize,
    pub total_expected_steps: usize,
    pub url_frequency: UrlFrequencyRanker,
}

impl ResearchState {
    pub fn new(config: &ResearchConfig) -> Self {
        Self {
            max_failed_attempts: config.max_failed_attempts,
            total_expected_steps: config.total_expected_steps(),
            ..Self::default()
        }
    }

    /// Enqueue subquestions not already pending or answered.
    pub fn enqueue_subquestions<I>(&mut self, candidates: I)
    where
        I: IntoIterator<Item = String>,
    {
        for candidate in candidates {
            let candidate = candidate.trim().to_string();
            if candidate.is_empty()
                || self.answered_subquestions.contains(&candidate)
                || self.subquestions.contains(&candidate)
            {
                continue;
            }
            self.subquestions.push_back(candidate);
        }
    }

    /// Pop the next pending subquestion, marking it answered.
    pub fn dequeue_subquestion(&mut self) -> Option<String> {
        let question = self.subquestions.pop_front()?;
        self.answered_subquestions.insert(question.clone());
        Some(question)
    }
}
