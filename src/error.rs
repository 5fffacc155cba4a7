//! Error types for the research service.

use std::time::Duration;
use thiserror::Error;

/// Failure classes surfaced by the capability clients and the loop.
///
/// The orchestrator never propagates these to the caller: every component
/// degrades to a defined fallback so a run always reaches synthesis.
#[derive(Error, Debug)]
pub enum ResearchError {
    /// A single search attempt failed and may be retried.
    #[error("search attempt failed: {0}")]
    SearchTransient(String),

    /// All search attempts for one query failed.
    #[error("search exhausted after {attempts} attempts: {message}")]
    SearchExhausted { attempts: usize, message: String },

    /// A per-URL extraction exceeded its hard timeout.
    #[error("extraction timed out after {0:?}")]
    ExtractTimeout(Duration),

    /// Extraction succeeded but returned no usable content.
    #[error("extraction returned no usable content for {0}")]
    ExtractEmpty(String),

    /// The LLM call itself failed.
    #[error("LLM call failed: {0}")]
    LlmCall(String),

    /// The LLM responded but nothing parseable could be recovered.
    #[error("could not parse LLM output: {0}")]
    LlmParse(String),

    /// A capability returned a malformed or unsuccessful envelope.
    #[error("capability error: {0}")]
    Capability(String),
}

pub type Result<T> = std::result::Result<T, ResearchError>;
