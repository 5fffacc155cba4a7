//! The bounded research loop.
//!
//! One hop: pick a topic, search it repeatedly to build URL frequency
//! statistics, extract the top unseen URLs, analyze the accumulated
//! evidence, then decide whether to stop. Components degrade to fallbacks
//! rather than erroring, so every run ends in synthesis.

use crate::config::{Mode, ResearchConfig};
use crate::events::{
    Activity, ActivityKind, ActivityStatus, DepthDelta, Finish, ProgressInit, ProgressSink,
    ResearchEvent, SourceInfo,
};
use crate::models::{AnalysisResult, Confidence, ModelIds, ResearchState, SubAnswer};
use crate::research::analyzer::{error_fallback, Analyzer};
use crate::research::extractor::Extractor;
use crate::research::planner::Planner;
use crate::research::searcher::Searcher;
use crate::research::synthesizer::Synthesizer;
use crate::tools::Capabilities;
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why the loop stopped before exhausting its depth budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    HighConfidence,
    MediumConfidence,
    EnoughFindings,
    AnalyzerSaidStop,
}

/// Post-hop termination check over the latest analysis.
pub fn stop_reason(analysis: &AnalysisResult, findings: usize) -> Option<StopReason> {
    if analysis.has_answer && analysis.confidence == Confidence::High && findings >= 3 {
        Some(StopReason::HighConfidence)
    } else if analysis.has_answer && analysis.confidence == Confidence::Medium && findings >= 6 {
        Some(StopReason::MediumConfidence)
    } else if findings >= 8 {
        Some(StopReason::EnoughFindings)
    } else if !analysis.should_continue {
        Some(StopReason::AnalyzerSaidStop)
    } else {
        None
    }
}

pub struct Orchestrator {
    caps: Capabilities,
    config: ResearchConfig,
}

impl Orchestrator {
    pub fn new(caps: Capabilities, config: ResearchConfig) -> Self {
        Self { caps, config }
    }

    /// Drive the loop to completion and return the final answer text.
    /// Never fails; the worst outcome is the formatter's fallback.
    pub async fn run(&self, question: &str, models: &ModelIds, sink: &dyn ProgressSink) -> String {
        let run_id = Uuid::new_v4();
        let start = Instant::now();
        let mut state = ResearchState::new(&self.config);

        let searcher = Searcher::new(self.caps.search.clone(), self.config.search_retry);
        let extractor = Extractor::new(
            self.caps.extract.clone(),
            self.caps.scrape.clone(),
            self.config.extract_timeout,
            self.config.extract_retry,
            self.config.inter_url_pause,
        );
        let planner = Planner::new(self.caps.llm.clone(), &models.reasoning_model);
        let analyzer = Analyzer::new(self.caps.llm.clone(), &models.reasoning_model);
        let synthesizer = Synthesizer::new(self.caps.llm.clone(), &models.reasoning_model);

        info!(%run_id, question, mode = ?self.config.mode, "starting research loop");
        sink.emit(ResearchEvent::ProgressInit(ProgressInit {
            max_depth: self.config.max_depth,
            total_steps: state.total_expected_steps,
        }));

        // Eval extraction prompts are built around the question's
        // identifying constraints; interactive extraction is generic.
        let constraints = match self.config.mode {
            Mode::Eval => planner.extract_constraints(question).await,
            Mode::Interactive => Vec::new(),
        };

        loop {
            if state.current_depth >= self.config.max_depth {
                info!(%run_id, "depth budget exhausted");
                break;
            }
            if start.elapsed() >= self.config.time_limit {
                info!(%run_id, elapsed = ?start.elapsed(), "time budget exhausted");
                break;
            }
            if state.failed_attempts >= state.max_failed_attempts {
                warn!(%run_id, failed = state.failed_attempts, "too many failed attempts");
                break;
            }

            state.current_depth += 1;
            sink.emit(ResearchEvent::DepthDelta(DepthDelta {
                current: state.current_depth,
                max: self.config.max_depth,
                completed_steps: state.completed_steps,
                total_steps: state.total_expected_steps,
            }));

            let topic = planner.select_topic(question, &mut state).await;
            debug!(%run_id, depth = state.current_depth, %topic, "hop topic selected");

            // Search rounds. Repeating the query turns result overlap into
            // a usable frequency signal.
            activity(
                sink,
                &mut state,
                ActivityKind::Search,
                ActivityStatus::Pending,
                format!("Searching for \"{topic}\""),
            );
            let mut search_failed = false;
            let mut hits = 0usize;
            for round in 0..self.config.searches_per_hop {
                if round > 0 {
                    tokio::time::sleep(self.config.inter_search_pause).await;
                }
                match searcher.search(&topic).await {
                    Ok(results) => {
                        hits += results.len();
                        for result in &results {
                            sink.emit(ResearchEvent::SourceDelta(SourceInfo {
                                url: result.url.clone(),
                                title: result.title.clone(),
                                description: result.description.clone(),
                            }));
                        }
                        state.url_frequency.observe(&results);
                    }
                    Err(e) => {
                        warn!(%run_id, %topic, error = %e, "search exhausted");
                        state.failed_attempts += 1;
                        search_failed = true;
                        break;
                    }
                }
            }
            if search_failed {
                activity(
                    sink,
                    &mut state,
                    ActivityKind::Search,
                    ActivityStatus::Error,
                    format!("Search failed for \"{topic}\""),
                );
            } else {
                activity(
                    sink,
                    &mut state,
                    ActivityKind::Search,
                    ActivityStatus::Complete,
                    format!("Found {hits} results for \"{topic}\""),
                );
            }

            // Candidate URLs for this hop. An analyzer-suggested URL jumps
            // the queue in interactive mode.
            let mut targets: Vec<String> = Vec::new();
            if self.config.mode == Mode::Interactive {
                if let Some(url) = state.url_to_search.take() {
                    if !state.processed_urls.contains(&url) {
                        targets.push(url);
                    }
                }
            }
            let remaining = self.config.urls_per_hop.saturating_sub(targets.len());
            for url in state
                .url_frequency
                .select_top_unseen(remaining, &state.processed_urls)
            {
                if !targets.contains(&url) {
                    targets.push(url);
                }
            }
            for url in &targets {
                state.processed_urls.insert(url.clone());
            }

            activity(
                sink,
                &mut state,
                ActivityKind::Extract,
                ActivityStatus::Pending,
                format!("Reading {} sources", targets.len()),
            );
            let prompt = match self.config.mode {
                Mode::Eval => constraint_extraction_prompt(question, &constraints),
                Mode::Interactive => summary_extraction_prompt(question),
            };
            let hop_findings = if targets.is_empty() {
                Vec::new()
            } else {
                match self.config.mode {
                    Mode::Eval => extractor.extract_many(&targets, &prompt).await,
                    Mode::Interactive => extractor.extract_many_parallel(&targets, &prompt).await,
                }
            };
            if hop_findings.is_empty() {
                if !search_failed {
                    state.failed_attempts += 1;
                }
                activity(
                    sink,
                    &mut state,
                    ActivityKind::Extract,
                    ActivityStatus::Error,
                    "No extractable content this round".to_string(),
                );
            } else {
                activity(
                    sink,
                    &mut state,
                    ActivityKind::Extract,
                    ActivityStatus::Complete,
                    format!("Extracted {} findings", hop_findings.len()),
                );
            }
            state.findings.extend(hop_findings);

            // Analysis.
            activity(
                sink,
                &mut state,
                ActivityKind::Analyze,
                ActivityStatus::Pending,
                "Assessing the evidence".to_string(),
            );
            let time_remaining_min = self
                .config
                .time_limit
                .saturating_sub(start.elapsed())
                .as_secs_f64()
                / 60.0;
            let analysis = match analyzer
                .analyze(
                    question,
                    &state.findings,
                    &state.sub_answers,
                    state.current_depth,
                    self.config.max_depth,
                    time_remaining_min,
                )
                .await
            {
                Some(analysis) => {
                    activity(
                        sink,
                        &mut state,
                        ActivityKind::Analyze,
                        ActivityStatus::Complete,
                        if analysis.summary.is_empty() {
                            "Evidence assessed".to_string()
                        } else {
                            analysis.summary.clone()
                        },
                    );
                    analysis
                }
                None => {
                    state.failed_attempts += 1;
                    activity(
                        sink,
                        &mut state,
                        ActivityKind::Analyze,
                        ActivityStatus::Error,
                        "Analysis failed".to_string(),
                    );
                    error_fallback(question, state.findings.len(), time_remaining_min)
                }
            };

            if !analysis.summary.is_empty() {
                state.summaries.push(analysis.summary.clone());
            }
            state.next_search_topic = analysis.next_search_topic.clone();
            state.url_to_search = analysis.url_to_search.clone();
            state.enqueue_subquestions(analysis.subquestions.iter().cloned());
            if let Some(answer) = analysis.sub_answer.clone() {
                let query = analysis.last_query.clone().unwrap_or_else(|| topic.clone());
                state.sub_answers.push(SubAnswer { query, answer });
            }

            activity(
                sink,
                &mut state,
                ActivityKind::Reasoning,
                ActivityStatus::Complete,
                format!(
                    "Confidence {:?}, {} open gaps",
                    analysis.confidence,
                    analysis.gaps.len()
                ),
            );

            if let Some(reason) = stop_reason(&analysis, state.findings.len()) {
                info!(%run_id, ?reason, findings = state.findings.len(), "stopping research loop");
                break;
            }
            if state.current_depth < self.config.max_depth {
                tokio::time::sleep(self.config.inter_hop_pause).await;
            }
        }

        activity(
            sink,
            &mut state,
            ActivityKind::Synthesis,
            ActivityStatus::Pending,
            "Synthesizing the final answer".to_string(),
        );
        let answer = match self.config.mode {
            Mode::Eval => synthesizer.synthesize_answer(question, &state.findings).await,
            Mode::Interactive => {
                synthesizer
                    .synthesize_report(question, &state.findings, &state.summaries)
                    .await
            }
        };
        activity(
            sink,
            &mut state,
            ActivityKind::Synthesis,
            ActivityStatus::Complete,
            "Research complete".to_string(),
        );
        sink.emit(ResearchEvent::Finish(Finish {
            content: answer.clone(),
        }));
        info!(
            %run_id,
            findings = state.findings.len(),
            depth = state.current_depth,
            elapsed = ?start.elapsed(),
            "research loop finished"
        );
        answer
    }
}

/// Emit one activity event; completed steps advance only on completion.
fn activity(
    sink: &dyn ProgressSink,
    state: &mut ResearchState,
    kind: ActivityKind,
    status: ActivityStatus,
    message: String,
) {
    if status == ActivityStatus::Complete {
        state.completed_steps += 1;
    }
    sink.emit(ResearchEvent::ActivityDelta(Activity {
        kind,
        status,
        message,
        timestamp: Utc::now().to_rfc3339(),
        depth: state.current_depth,
        completed_steps: state.completed_steps,
        total_steps: state.total_expected_steps,
    }));
}

fn constraint_extraction_prompt(question: &str, constraints: &[String]) -> String {
    let constraint_lines = constraints
        .iter()
        .map(|c| format!("- {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"Extract the facts on this page that bear on the research question.

Question: "{question}"

For each constraint below, report the page's value for it, or null when the page says nothing about it:
{constraint_lines}

Respond with ONLY a JSON object of this shape:
{{"constraintMatches": {{"<constraint>": "<value or null>"}}, "entityName": "<the entity this page is about, or null>", "additionalContext": "<one sentence of context>"}}"#
    )
}

fn summary_extraction_prompt(question: &str) -> String {
    format!(
        r#"Summarize the information on this page that helps answer: "{question}". Include names, dates, quantities, and any directly relevant facts. Be concise but complete."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(has_answer: bool, confidence: Confidence, should_continue: bool) -> AnalysisResult {
        AnalysisResult {
            has_answer,
            confidence,
            should_continue,
            ..AnalysisResult::default()
        }
    }

    #[test]
    fn high_confidence_needs_three_findings() {
        let a = analysis(true, Confidence::High, true);
        assert_eq!(stop_reason(&a, 2), None);
        assert_eq!(stop_reason(&a, 3), Some(StopReason::HighConfidence));
    }

    #[test]
    fn medium_confidence_needs_six_findings() {
        let a = analysis(true, Confidence::Medium, true);
        assert_eq!(stop_reason(&a, 5), None);
        assert_eq!(stop_reason(&a, 6), Some(StopReason::MediumConfidence));
    }

    #[test]
    fn eight_findings_stop_regardless() {
        let a = analysis(false, Confidence::Low, true);
        assert_eq!(stop_reason(&a, 8), Some(StopReason::EnoughFindings));
    }

    #[test]
    fn analyzer_can_call_the_stop() {
        let a = analysis(false, Confidence::Low, false);
        assert_eq!(stop_reason(&a, 0), Some(StopReason::AnalyzerSaidStop));
    }

    #[test]
    fn low_confidence_keeps_going() {
        let a = analysis(true, Confidence::Low, true);
        assert_eq!(stop_reason(&a, 7), None);
    }

    #[test]
    fn prompts_embed_the_question() {
        let constraints = vec!["in 1964".to_string()];
        let prompt = constraint_extraction_prompt("who signed?", &constraints);
        assert!(prompt.contains("who signed?"));
        assert!(prompt.contains("- in 1964"));
        assert!(prompt.contains("constraintMatches"));

        let generic = summary_extraction_prompt("who signed?");
        assert!(generic.contains("who signed?"));
        assert!(!generic.contains("constraintMatches"));
    }
}
