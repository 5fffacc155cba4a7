//! Query planning: identifying constraints, key terms, and the
//! constraint-preserving subquestion queue.

use crate::models::{Finding, ResearchState};
use crate::research::analyzer::salvage_json_value;
use crate::tools::{GenerateRequest, LanguageModel};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Articles, prepositions, auxiliaries, interrogatives, and the answer-format
/// words that must never become search terms.
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "than", "that", "this", "these", "those",
    "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does", "did",
    "will", "would", "shall", "should", "can", "could", "may", "might", "must", "of", "in", "on",
    "at", "by", "for", "with", "about", "against", "between", "into", "through", "during",
    "before", "after", "above", "below", "to", "from", "up", "down", "out", "off", "over",
    "under", "again", "further", "as", "it", "its", "their", "there", "here", "when", "where",
    "why", "how", "what", "which", "who", "whom", "whose", "explanation", "answer", "confidence",
    "response", "additionally", "also", "both", "either", "neither",
];

const FORBIDDEN_FRAGMENTS: &[&str] = &["explanation", "answer", "confidence"];

const MAX_PER_CATEGORY: usize = 8;
const MAX_KEY_TERMS: usize = 8;
const MAX_CONSTRAINTS: usize = 8;
const MAX_SUBQUESTIONS: usize = 8;
const FINDING_SNIPPET_CHARS: usize = 150;

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word.to_ascii_lowercase().as_str())
}

struct TermCollector {
    seen: HashSet<String>,
    terms: Vec<String>,
}

impl TermCollector {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            terms: Vec::new(),
        }
    }

    fn push(&mut self, term: &str) -> bool {
        let trimmed = term.trim();
        if trimmed.is_empty() || !self.seen.insert(trimmed.to_ascii_lowercase()) {
            return false;
        }
        self.terms.push(trimmed.to_string());
        true
    }

    fn extend_capped<I>(&mut self, candidates: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = 0;
        for candidate in candidates {
            if added >= MAX_PER_CATEGORY {
                break;
            }
            if self.push(&candidate) {
                added += 1;
            }
        }
    }
}

fn quoted_phrases(text: &str) -> Vec<String> {
    let re = Regex::new(r#""([^"]{3,}?)""#).expect("static pattern compiles");
    re.captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn capitalized_sequences(text: &str) -> Vec<String> {
    let re = Regex::new(r"\b[A-Z][A-Za-z]*(?:\s+[A-Z][A-Za-z]*){0,2}\b")
        .expect("static pattern compiles");
    re.find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|seq| !is_stopword(seq))
        .collect()
}

fn years(text: &str) -> Vec<String> {
    let re = Regex::new(r"\b(19[5-9][0-9]|20[0-4][0-9])\b").expect("static pattern compiles");
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

fn percentages(text: &str) -> Vec<String> {
    let re = Regex::new(r"\b\d+(?:\.\d+)?%").expect("static pattern compiles");
    re.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

fn lowercase_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.len() > 4)
        .filter(|w| w.chars().all(|c| c.is_ascii_lowercase()))
        .filter(|w| !is_stopword(w))
        .filter(|w| !FORBIDDEN_FRAGMENTS.iter().any(|frag| w.contains(frag)))
        .map(str::to_string)
        .collect()
}

/// Distill a question into its most identifying tokens: quoted phrases,
/// proper-noun runs, years, percentages, and long lowercase words, longest
/// first.
pub fn extract_key_terms(question: &str) -> String {
    let mut collector = TermCollector::new();
    collector.extend_capped(quoted_phrases(question));
    collector.extend_capped(capitalized_sequences(question));
    collector.extend_capped(years(question));
    collector.extend_capped(percentages(question));
    collector.extend_capped(lowercase_words(question));

    let mut terms = collector.terms;
    terms.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
    terms.truncate(MAX_KEY_TERMS);
    terms.join(" ")
}

/// True when a suggested search topic is too vague to be worth issuing:
/// a bare interrogative, fewer than three words, or pure digits.
pub fn is_generic_query(query: &str) -> bool {
    const GENERIC_WORDS: &[&str] = &[
        "what", "when", "where", "who", "how", "name", "info", "event",
    ];
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return true;
    }
    if GENERIC_WORDS.contains(&trimmed.to_ascii_lowercase().as_str()) {
        return true;
    }
    if trimmed.split_whitespace().count() < 3 {
        return true;
    }
    trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_whitespace())
}

/// Last-resort query built from whatever identifying fragments the question
/// has: named entities, years, and numbers with their following word.
pub fn generate_fallback_query(question: &str) -> String {
    let number_with_word =
        Regex::new(r"\b\d+(?:\.\d+)?\s+[A-Za-z][A-Za-z-]*").expect("static pattern compiles");

    let mut collector = TermCollector::new();
    collector.extend_capped(quoted_phrases(question));
    collector.extend_capped(capitalized_sequences(question));
    collector.extend_capped(years(question));
    collector.extend_capped(percentages(question));
    collector.extend_capped(
        number_with_word
            .find_iter(question)
            .map(|m| m.as_str().to_string()),
    );

    let mut entities = collector.terms;
    entities.truncate(5);
    if !entities.is_empty() {
        return entities.join(" ");
    }

    let mut words = lowercase_words(question);
    words.truncate(4);
    if !words.is_empty() {
        return words.join(" ");
    }
    "search query".to_string()
}

pub struct Planner {
    llm: Arc<dyn LanguageModel>,
    reasoning_model: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LanguageModel>, reasoning_model: impl Into<String>) -> Self {
        Self {
            llm,
            reasoning_model: reasoning_model.into(),
        }
    }

    /// Derive the identifying constraints of the question.
    ///
    /// Falls back to key terms when the model produces nothing usable.
    pub async fn extract_constraints(&self, question: &str) -> Vec<String> {
        let prompt = format!(
            r#"You are preparing a web research task.

Question: "{question}"

List the short identifying constraints contained in the question: dates, quantities, names, places, and distinctive properties that any correct answer must satisfy. Each constraint should be a fragment of a few words, not a sentence.

Respond with ONLY a JSON array of strings."#
        );
        let request = GenerateRequest::new(&self.reasoning_model, prompt).max_tokens(300);

        let constraints = match self.llm.generate_text(request).await {
            Ok(raw) => parse_string_array(&raw)
                .unwrap_or_default()
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| c.len() > 2 && c.len() < 50)
                .filter(|c| {
                    let lower = c.to_lowercase();
                    !lower.contains("explanation") && !lower.contains("confidence")
                })
                .take(MAX_CONSTRAINTS)
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(error = %e, "constraint extraction call failed");
                Vec::new()
            }
        };

        if !constraints.is_empty() {
            return constraints;
        }
        extract_key_terms(question)
            .split_whitespace()
            .take(5)
            .map(str::to_string)
            .collect()
    }

    /// Generate constraint-preserving subquestions from the latest
    /// findings. `None` means the model output could not be parsed.
    pub async fn generate_subquestions(
        &self,
        question: &str,
        findings: &[Finding],
    ) -> Option<Vec<String>> {
        let recent: Vec<String> = findings
            .iter()
            .rev()
            .take(3)
            .map(|f| {
                let snippet: String = f.text.chars().take(FINDING_SNIPPET_CHARS).collect();
                format!("- {snippet}")
            })
            .collect();
        let recent_block = if recent.is_empty() {
            "(no findings yet)".to_string()
        } else {
            recent.join("\n")
        };

        let prompt = format!(
            r#"You are planning the next searches of a web research task.

Main question: "{question}"

Most recent findings:
{recent_block}

Write narrower subquestions that each keep every identifying constraint of the main question while probing one unknown. Good subquestions are specific enough to search for directly.

Respond with ONLY a JSON array of strings."#
        );
        let request = GenerateRequest::new(&self.reasoning_model, prompt);

        let raw = match self.llm.generate_text(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "subquestion generation call failed");
                return None;
            }
        };
        let subquestions: Vec<String> = parse_string_array(&raw)?
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| q.len() > 10 && q.len() < 100)
            .take(MAX_SUBQUESTIONS)
            .collect();
        Some(subquestions)
    }

    /// Pick the search topic for the hop that just started.
    pub async fn select_topic(&self, question: &str, state: &mut ResearchState) -> String {
        let topic = self.select_topic_inner(question, state).await;
        // A dry spell this long means the current line of attack is wrong;
        // restart from the question's own entities.
        if state.failed_attempts >= 2 && state.findings.is_empty() {
            let fallback = generate_fallback_query(question);
            debug!(%topic, %fallback, "overriding topic after repeated failures");
            return fallback;
        }
        topic
    }

    async fn select_topic_inner(&self, question: &str, state: &mut ResearchState) -> String {
        if state.current_depth <= 1 {
            return question.to_string();
        }
        if let Some(subquestion) = state.dequeue_subquestion() {
            return subquestion;
        }

        let suggested_is_usable = state
            .next_search_topic
            .as_deref()
            .map(|topic| !is_generic_query(topic))
            .unwrap_or(false);
        if suggested_is_usable {
            if let Some(topic) = state.next_search_topic.clone() {
                return topic;
            }
        }

        match self.generate_subquestions(question, &state.findings).await {
            Some(generated) => {
                state.enqueue_subquestions(generated);
                state
                    .dequeue_subquestion()
                    .unwrap_or_else(|| extract_key_terms(question))
            }
            None => extract_key_terms(question),
        }
    }
}

/// Parse a JSON array of strings out of raw model output, tolerating fences
/// and surrounding prose.
fn parse_string_array(raw: &str) -> Option<Vec<String>> {
    let value = salvage_json_value(raw)?;
    let items = value.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}
