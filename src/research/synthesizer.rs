//! Final answer synthesis and the three-line output format.

use crate::models::Finding;
use crate::research::planner::Planner;
use crate::tools::{GenerateRequest, LanguageModel};
use regex::Regex;
use std::sync::Arc;
use tracing::{info, warn};

const SYNTHESIS_MAX_TOKENS: u64 = 800;

const DEFAULT_EXPLANATION: &str = "The research could not find a definitive answer.";
const DEFAULT_EXACT_ANSWER: &str = "Unknown";
const DEFAULT_CONFIDENCE: &str = "30%";

/// How many findings mention each constraint (case-insensitive substring).
pub fn constraint_coverage(constraints: &[String], findings: &[Finding]) -> Vec<usize> {
    constraints
        .iter()
        .map(|constraint| {
            let needle = constraint.to_lowercase();
            findings
                .iter()
                .filter(|f| f.text.to_lowercase().contains(&needle))
                .count()
        })
        .collect()
}

pub struct Synthesizer {
    llm: Arc<dyn LanguageModel>,
    reasoning_model: String,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>, reasoning_model: impl Into<String>) -> Self {
        Self {
            llm,
            reasoning_model: reasoning_model.into(),
        }
    }

    /// Produce the strict three-line answer from whatever evidence exists.
    /// Never fails: degrades through the formatter to the hard fallback.
    pub async fn synthesize_answer(&self, question: &str, findings: &[Finding]) -> String {
        let planner = Planner::new(self.llm.clone(), &self.reasoning_model);
        let constraints = planner.extract_constraints(question).await;
        let coverage = constraint_coverage(&constraints, findings);
        info!(
            constraints = constraints.len(),
            findings = findings.len(),
            "synthesizing final answer"
        );

        let prompt = build_synthesis_prompt(question, findings, &constraints, &coverage);
        let request = GenerateRequest::new(&self.reasoning_model, prompt)
            .max_tokens(SYNTHESIS_MAX_TOKENS);

        let raw = match self.llm.generate_text(request).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "synthesis call failed");
                String::new()
            }
        };

        let formatted = format_final_answer(&raw, question);
        if has_exact_answer_line(&formatted) {
            formatted
        } else {
            hard_fallback(question)
        }
    }

    /// Long-form markdown report for interactive runs.
    pub async fn synthesize_report(
        &self,
        question: &str,
        findings: &[Finding],
        summaries: &[String],
    ) -> String {
        let sources = findings
            .iter()
            .enumerate()
            .map(|(i, f)| format!("--- SOURCE {} ({}) ---\n{}", i + 1, f.source, f.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let summary_block = if summaries.is_empty() {
            "(none)".to_string()
        } else {
            summaries.join("\n")
        };

        let prompt = format!(
            r#"You are a research assistant. Create a comprehensive research report answering: "{question}"

Interim analysis notes:
{summary_block}

Raw research data:
{sources}

Requirements:
- Create a well-structured markdown report
- Open with the direct answer, then an executive summary
- Organize supporting findings logically
- Add a conclusion section
- Include citations with URLs where appropriate
- Use proper markdown formatting (headers, lists, etc.)"#
        );
        let request = GenerateRequest::new(&self.reasoning_model, prompt);

        match self.llm.generate_text(request).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "report synthesis failed, returning findings digest");
                fallback_report(question, findings)
            }
        }
    }
}

fn build_synthesis_prompt(
    question: &str,
    findings: &[Finding],
    constraints: &[String],
    coverage: &[usize],
) -> String {
    let constraint_block = constraints
        .iter()
        .zip(coverage.iter())
        .map(|(c, n)| format!("- {c} (mentioned in {n} sources)"))
        .collect::<Vec<_>>()
        .join("\n");
    let sources = if findings.is_empty() {
        "(no sources were gathered)".to_string()
    } else {
        findings
            .iter()
            .enumerate()
            .map(|(i, f)| format!("--- SOURCE {} ({}) ---\n{}", i + 1, f.source, f.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    };

    format!(
        r#"You must answer a research question using only the sources below.

Question: "{question}"

Identifying constraints the answer must satisfy:
{constraint_block}

Sources:
{sources}

Instructions:
1. List the candidate answers that appear in the sources.
2. Score each candidate as matched_constraints/total_constraints against the list above.
3. Choose the highest-scoring candidate. If no candidate matches any constraint, answer "Unknown".
4. Set the confidence percentage from the winning score and the quality of the sources.

Respond with EXACTLY three lines and nothing else:
Explanation: <one or two sentences justifying the choice>
Exact Answer: <the answer alone, as short as possible>
Confidence: <number between 0 and 100>%"#
    )
}

fn fallback_report(question: &str, findings: &[Finding]) -> String {
    let mut report = format!("# Research notes: {question}\n\n");
    if findings.is_empty() {
        report.push_str("No findings were gathered.\n");
    } else {
        for finding in findings {
            report.push_str(&format!("- {} ({})\n", finding.text.trim(), finding.source));
        }
    }
    report
}

/// Fallback used when nothing resembling an answer came back.
pub fn hard_fallback(question: &str) -> String {
    format!(
        "Explanation: The research could not find a definitive answer to: \"{question}\".\nExact Answer: Unknown\nConfidence: 0%"
    )
}

fn empty_input_fallback(question: &str) -> String {
    format!(
        "Explanation: The research could not find a definitive answer to: \"{question}\".\nExact Answer: Unknown\nConfidence: 10%"
    )
}

pub fn has_exact_answer_line(text: &str) -> bool {
    text.lines()
        .any(|line| line.trim_start().to_lowercase().starts_with("exact answer:"))
}

/// Force a candidate answer into the three-line format.
///
/// Well-formed input passes through untouched; labelled fragments are
/// re-assembled with defaults for whatever is missing; anything else
/// becomes the low-confidence fallback. Idempotent.
pub fn format_final_answer(candidate: &str, question: &str) -> String {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return empty_input_fallback(question);
    }

    if is_well_formed(trimmed) {
        return trimmed.to_string();
    }

    let explanation = labelled_section(trimmed, "explanation");
    let exact_answer = labelled_section(trimmed, "exact answer");
    let confidence = confidence_token(trimmed);

    if explanation.is_none() && exact_answer.is_none() && confidence.is_none() {
        return empty_input_fallback(question);
    }

    let explanation = explanation.unwrap_or_else(|| DEFAULT_EXPLANATION.to_string());
    let exact_answer = exact_answer.unwrap_or_else(|| DEFAULT_EXACT_ANSWER.to_string());
    let confidence = confidence.unwrap_or_else(|| DEFAULT_CONFIDENCE.to_string());

    format!("Explanation: {explanation}\nExact Answer: {exact_answer}\nConfidence: {confidence}")
}

fn is_well_formed(trimmed: &str) -> bool {
    let lines: Vec<&str> = trimmed.lines().collect();
    if lines.len() != 3 {
        return false;
    }
    let confidence_line =
        Regex::new(r"(?i)^confidence:\s*(100|[1-9]?\d)%$").expect("static pattern compiles");
    lines[0].to_lowercase().starts_with("explanation:")
        && lines[1].to_lowercase().starts_with("exact answer:")
        && confidence_line.is_match(lines[2].trim())
}

/// The text between `<label>:` and the next label (or end of input),
/// case-insensitive.
fn labelled_section(text: &str, label: &str) -> Option<String> {
    let labels = ["explanation", "exact answer", "confidence"];
    let start_re =
        Regex::new(&format!(r"(?i){}\s*:", regex::escape(label))).expect("static pattern compiles");
    let m = start_re.find(text)?;
    let after = &text[m.end()..];

    let mut end = after.len();
    for other in labels.iter().filter(|l| **l != label) {
        let other_re =
            Regex::new(&format!(r"(?i){}\s*:", regex::escape(other))).expect("static pattern compiles");
        if let Some(om) = other_re.find(after) {
            end = end.min(om.start());
        }
    }
    let section = after[..end].trim().to_string();
    (!section.is_empty()).then_some(section)
}

fn confidence_token(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)confidence:\s*(\d{1,3}%)").expect("static pattern compiles");
    re.captures(text)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResearchError;
    use async_trait::async_trait;

    fn findings(texts: &[&str]) -> Vec<Finding> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Finding {
                text: t.to_string(),
                source: format!("https://example.com/{i}"),
            })
            .collect()
    }

    #[test]
    fn coverage_counts_case_insensitively() {
        let constraints = vec!["civil rights act".to_string(), "1970".to_string()];
        let fs = findings(&[
            "Lyndon B. Johnson signed the Civil Rights Act of 1964",
            "The Civil Rights Act passed the Senate",
        ]);
        assert_eq!(constraint_coverage(&constraints, &fs), vec![2, 0]);
    }

    #[test]
    fn well_formed_answer_passes_through() {
        let input = "Explanation: LBJ signed it.\nExact Answer: Lyndon B. Johnson\nConfidence: 95%";
        assert_eq!(format_final_answer(input, "q"), input);
    }

    #[test]
    fn empty_input_gets_ten_percent_fallback() {
        let out = format_final_answer("   ", "who did it?");
        assert!(out.contains("who did it?"));
        assert!(out.ends_with("Confidence: 10%"));
        assert_eq!(out.lines().count(), 3);
    }

    #[test]
    fn labelled_fragments_are_reassembled() {
        let input = "Based on the sources, Exact Answer: Paris. Confidence: 80% overall";
        let out = format_final_answer(input, "q");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Explanation:"));
        assert!(lines[1].contains("Paris"));
        assert!(lines[2].contains("80%"));
    }

    #[test]
    fn missing_sections_get_defaults() {
        let input = "Explanation: the trail went cold here";
        let out = format_final_answer(input, "q");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], "Exact Answer: Unknown");
        assert_eq!(lines[2], "Confidence: 30%");
    }

    #[test]
    fn unlabelled_prose_falls_back() {
        let out = format_final_answer("I simply do not know anything about this.", "q");
        assert!(out.ends_with("Confidence: 10%"));
        assert!(has_exact_answer_line(&out));
    }

    #[test]
    fn formatter_is_idempotent() {
        let inputs = [
            "Explanation: a.\nExact Answer: b\nConfidence: 50%",
            "some prose Exact Answer: b more prose",
            "",
            "Explanation only here",
            "Confidence: 250% is out of range",
        ];
        for input in inputs {
            let once = format_final_answer(input, "the question");
            let twice = format_final_answer(&once, "the question");
            assert_eq!(once, twice, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn format_regex_invariant_holds() {
        let re = Regex::new(
            r"(?i)^explanation:.*\nexact answer:.*\nconfidence:\s*\d{1,3}%$",
        )
        .unwrap();
        for input in ["", "garbage", "Exact Answer: X", "Explanation: y\nExact Answer: z\nConfidence: 10%"] {
            let out = format_final_answer(input, "q");
            assert!(re.is_match(&out), "bad format for {input:?}: {out}");
        }
    }

    struct ScriptedLlm {
        responses: std::sync::Mutex<Vec<Result<String, String>>>,
    }

    #[async_trait]
    impl crate::tools::LanguageModel for ScriptedLlm {
        async fn generate_text(
            &self,
            _req: crate::tools::GenerateRequest,
        ) -> Result<String, ResearchError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(ResearchError::LlmCall("script exhausted".into()));
            }
            responses.remove(0).map_err(ResearchError::LlmCall)
        }
    }

    fn synthesizer(responses: Vec<Result<String, String>>) -> Synthesizer {
        Synthesizer::new(
            Arc::new(ScriptedLlm {
                responses: std::sync::Mutex::new(responses),
            }),
            "test-model",
        )
    }

    #[tokio::test]
    async fn synthesis_formats_model_output() {
        let synth = synthesizer(vec![
            // constraint extraction
            Ok(r#"["civil rights act", "1964"]"#.to_string()),
            // synthesis
            Ok("Explanation: Johnson signed it.\nExact Answer: Lyndon B. Johnson\nConfidence: 92%"
                .to_string()),
        ]);
        let fs = findings(&["Lyndon B. Johnson signed the Civil Rights Act of 1964"]);
        let answer = synth.synthesize_answer("who signed?", &fs).await;
        assert!(answer.contains("Exact Answer: Lyndon B. Johnson"));
        assert!(answer.ends_with("Confidence: 92%"));
    }

    #[tokio::test]
    async fn synthesis_degrades_to_unknown_on_llm_failure() {
        let synth = synthesizer(vec![
            Ok(r#"["a constraint"]"#.to_string()),
            Err("model offline".to_string()),
        ]);
        let answer = synth.synthesize_answer("who signed?", &[]).await;
        assert!(answer.contains("Exact Answer: Unknown"));
        assert!(answer.ends_with("Confidence: 10%"));
        assert_eq!(answer.lines().count(), 3);
    }

    #[tokio::test]
    async fn report_falls_back_to_digest() {
        let synth = synthesizer(vec![Err("model offline".to_string())]);
        let fs = findings(&["a fact"]);
        let report = synth.synthesize_report("q", &fs, &[]).await;
        assert!(report.contains("a fact"));
        assert!(report.contains("https://example.com/0"));
    }
}
