//! Progress analysis via the reasoning model, with tiered JSON salvage.
//!
//! Reasoning models wrap their JSON in prose, code fences, or half-valid
//! fragments. The salvage tiers recover a usable [`AnalysisResult`] from
//! anything: direct parse, fenced blocks, embedded objects, and finally a
//! textual heuristic that never fails.

use crate::models::{AnalysisResult, Confidence, Finding, SubAnswer};
use crate::research::planner::generate_fallback_query;
use crate::tools::{GenerateRequest, LanguageModel};
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Most characters of raw model output kept as a salvaged summary.
const TEXT_SUMMARY_CHARS: usize = 200;

pub struct Analyzer {
    llm: Arc<dyn LanguageModel>,
    reasoning_model: String,
}

impl Analyzer {
    pub fn new(llm: Arc<dyn LanguageModel>, reasoning_model: impl Into<String>) -> Self {
        Self {
            llm,
            reasoning_model: reasoning_model.into(),
        }
    }

    /// Ask the reasoning model where the research stands.
    ///
    /// Returns `None` only when the LLM call itself fails; the caller
    /// counts that as a failed attempt and substitutes [`error_fallback`].
    /// Any response text, however malformed, salvages into a record.
    pub async fn analyze(
        &self,
        question: &str,
        findings: &[Finding],
        sub_answers: &[SubAnswer],
        current_depth: usize,
        max_depth: usize,
        time_remaining_min: f64,
    ) -> Option<AnalysisResult> {
        let prompt = build_analysis_prompt(
            question,
            findings,
            sub_answers,
            current_depth,
            max_depth,
            time_remaining_min,
        );
        let request = GenerateRequest::new(&self.reasoning_model, prompt);
        match self.llm.generate_text(request).await {
            Ok(raw) => Some(salvage_analysis(
                &raw,
                question,
                findings.len(),
                time_remaining_min,
            )),
            Err(e) => {
                warn!(error = %e, "analysis call failed");
                None
            }
        }
    }
}

fn build_analysis_prompt(
    question: &str,
    findings: &[Finding],
    sub_answers: &[SubAnswer],
    current_depth: usize,
    max_depth: usize,
    time_remaining_min: f64,
) -> String {
    let findings_block = if findings.is_empty() {
        "(no findings yet)".to_string()
    } else {
        findings
            .iter()
            .map(|f| format!("[{}]\n{}", f.source, f.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    let sub_answers_block = if sub_answers.is_empty() {
        "(none)".to_string()
    } else {
        sub_answers
            .iter()
            .map(|sa| format!("Q: {}\nA: {}", sa.query, sa.answer))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"You are analyzing the progress of a web research task.

Question: "{question}"

Research depth: {current_depth}/{max_depth}. Time remaining: {time_remaining_min:.1} minutes.

Findings so far:
{findings_block}

Answered subquestions:
{sub_answers_block}

Assess whether the findings identify a single candidate answer that satisfies every constraint in the question.

Rules:
- "high" confidence requires one candidate consistent with every constraint, supported by at least two independent sources.
- "medium" means one leading candidate with at least one constraint unverified.
- "low" means no candidate, or conflicting candidates.
- When a candidate looks promising, prefer verifying its remaining constraints over broadening the search; put the verification query in nextSearchTopic.
- Set shouldContinue to false only when more searching cannot improve the answer.

Respond with ONLY a JSON object of this shape:
{{"summary": string, "hasAnswer": boolean, "confidence": "low" | "medium" | "high", "gaps": [string], "shouldContinue": boolean, "nextSearchTopic": string, "urlToSearch": string, "subquestions": [string], "subAnswer": string, "lastQuery": string}}"#
    )
}

/// Recover an analysis record from raw model output. Never fails.
pub fn salvage_analysis(
    raw: &str,
    question: &str,
    findings_len: usize,
    time_remaining_min: f64,
) -> AnalysisResult {
    // Tier 1: the whole response is JSON.
    if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
        if let Some(analysis) = AnalysisResult::from_value(&value) {
            return analysis;
        }
    }

    // Tier 2: fenced code blocks, in order of appearance.
    for block in extract_fenced_blocks(raw) {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            if let Some(analysis) = AnalysisResult::from_value(&value) {
                return analysis;
            }
        }
    }

    // Tier 3: balanced-looking objects embedded in prose.
    for candidate in balanced_candidates(raw, b'{', b'}') {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            if let Some(analysis) = AnalysisResult::from_value(&value) {
                return analysis;
            }
        }
    }

    debug!("no JSON recovered from analysis output, using textual salvage");
    textual_salvage(raw, question, findings_len, time_remaining_min)
}

/// Static record used when the reasoning call itself fails.
pub fn error_fallback(question: &str, findings_len: usize, time_remaining_min: f64) -> AnalysisResult {
    AnalysisResult {
        summary: "Analysis function encountered an error".to_string(),
        has_answer: false,
        confidence: Confidence::Low,
        gaps: vec!["Analysis system error".to_string()],
        should_continue: findings_len < 5 && time_remaining_min > 1.0,
        next_search_topic: Some(generate_fallback_query(question)),
        ..AnalysisResult::default()
    }
}

/// Tier 4: build a record from keyword heuristics on the raw text.
fn textual_salvage(
    raw: &str,
    question: &str,
    findings_len: usize,
    time_remaining_min: f64,
) -> AnalysisResult {
    let lower = raw.to_lowercase();
    let confidence = if lower.contains("high confidence") || lower.contains("confident") {
        Confidence::High
    } else if lower.contains("medium") || lower.contains("moderate") {
        Confidence::Medium
    } else {
        Confidence::Low
    };
    let has_answer = lower.contains("found")
        || lower.contains("answer")
        || lower.contains("identified")
        || confidence == Confidence::High;
    let should_continue = findings_len < 3
        || time_remaining_min > 1.5
        || lower.contains("continue")
        || lower.contains("more search")
        || lower.contains("insufficient");

    AnalysisResult {
        summary: raw.chars().take(TEXT_SUMMARY_CHARS).collect(),
        has_answer,
        confidence,
        gaps: vec!["More information needed".to_string()],
        should_continue,
        next_search_topic: Some(generate_fallback_query(question)),
        ..AnalysisResult::default()
    }
}

/// Inner text of every ```-fenced block, with an optional `json` language
/// tag stripped.
pub(crate) fn extract_fenced_blocks(raw: &str) -> Vec<String> {
    let fence = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").expect("static pattern compiles");
    fence
        .captures_iter(raw)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Balanced `open…close` substrings in order of their opening byte,
/// string-aware. Nested candidates are included so an outer fragment that
/// fails to parse does not hide a valid inner one.
pub(crate) fn balanced_candidates(text: &str, open: u8, close: u8) -> Vec<String> {
    const MAX_CANDIDATES: usize = 16;
    let bytes = text.as_bytes();
    let mut candidates = Vec::new();
    let mut start = 0;
    while start < bytes.len() && candidates.len() < MAX_CANDIDATES {
        let Some(offset) = bytes[start..].iter().position(|&b| b == open) else {
            break;
        };
        let from = start + offset;
        if let Some(end) = matching_close(bytes, from, open, close) {
            if let Ok(slice) = std::str::from_utf8(&bytes[from..=end]) {
                candidates.push(slice.to_string());
            }
        }
        start = from + 1;
    }
    candidates
}

fn matching_close(bytes: &[u8], from: usize, open: u8, close: u8) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(from) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Recover any JSON value (object or array) from raw model output.
pub(crate) fn salvage_json_value(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
        return Some(value);
    }
    for block in extract_fenced_blocks(raw) {
        if let Ok(value) = serde_json::from_str::<Value>(block.trim()) {
            return Some(value);
        }
    }
    for candidate in balanced_candidates(raw, b'{', b'}') {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Some(value);
        }
    }
    for candidate in balanced_candidates(raw, b'[', b']') {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            return Some(value);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_parse_wins() {
        let raw = r#"{"summary": "clean", "hasAnswer": true, "confidence": "high"}"#;
        let analysis = salvage_analysis(raw, "q", 0, 3.0);
        assert_eq!(analysis.summary, "clean");
        assert!(analysis.has_answer);
        assert_eq!(analysis.confidence, Confidence::High);
    }

    #[test]
    fn salvage_matches_direct_parse_for_valid_input() {
        let raw = r#"{"summary": "same", "hasAnswer": false, "gaps": ["g1"]}"#;
        let direct =
            AnalysisResult::from_value(&serde_json::from_str::<Value>(raw).unwrap()).unwrap();
        let salvaged = salvage_analysis(raw, "q", 0, 3.0);
        assert_eq!(direct, salvaged);
    }

    #[test]
    fn fenced_block_is_recovered() {
        let raw = "Here is my analysis:\n```json\n{\"summary\": \"fenced\", \"hasAnswer\": true}\n```\nHope that helps.";
        let analysis = salvage_analysis(raw, "q", 0, 3.0);
        assert_eq!(analysis.summary, "fenced");
        assert!(analysis.has_answer);
    }

    #[test]
    fn bare_fence_without_language_tag() {
        let raw = "```\n{\"summary\": \"bare\"}\n```";
        let analysis = salvage_analysis(raw, "q", 0, 3.0);
        assert_eq!(analysis.summary, "bare");
    }

    #[test]
    fn object_embedded_in_prose() {
        let raw = "here is my analysis ... {\"summary\":\"ok\",\"hasAnswer\":false} as requested";
        let analysis = salvage_analysis(raw, "q", 0, 3.0);
        assert_eq!(analysis.summary, "ok");
        assert!(!analysis.has_answer);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let raw = r#"noise {"summary": "has { and } inside", "hasAnswer": true} trailing"#;
        let analysis = salvage_analysis(raw, "q", 0, 3.0);
        assert_eq!(analysis.summary, "has { and } inside");
    }

    #[test]
    fn textual_salvage_reads_signals() {
        let raw = "I could not parse anything but I am confident the answer was identified; no more search needed.";
        let analysis = salvage_analysis(raw, "some question with Terms", 5, 0.5);
        assert_eq!(analysis.confidence, Confidence::High);
        assert!(analysis.has_answer);
        assert_eq!(analysis.gaps, vec!["More information needed"]);
        assert!(analysis.next_search_topic.is_some());
        assert_eq!(analysis.summary.chars().count().min(200), analysis.summary.chars().count());
    }

    #[test]
    fn textual_salvage_continues_when_findings_scarce() {
        let analysis = salvage_analysis("nothing useful here at all..", "q", 1, 0.1);
        assert!(analysis.should_continue);
        // "answer" absent and confidence low
        assert_eq!(analysis.confidence, Confidence::Low);
    }

    #[test]
    fn error_fallback_shape() {
        let fallback = error_fallback("question", 2, 2.0);
        assert_eq!(fallback.summary, "Analysis function encountered an error");
        assert_eq!(fallback.gaps, vec!["Analysis system error"]);
        assert!(fallback.should_continue);
        let exhausted = error_fallback("question", 6, 2.0);
        assert!(!exhausted.should_continue);
    }

    #[test]
    fn salvage_json_value_finds_arrays() {
        let raw = "the constraints are: [\"born in 1950\", \"won twice\"] as a list";
        let value = salvage_json_value(raw).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }
}
