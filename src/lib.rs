//! Autonomous research agent with a bounded, self-directed planning loop.
//!
//! Given a fact-finding question, the agent iteratively searches the web,
//! extracts constrained facts from the most promising pages, analyzes its
//! progress with a reasoning model, and synthesizes a final answer. The
//! loop is bounded in depth, wall time, and consecutive failures, and every
//! component degrades to a defined fallback so a run always terminates
//! with a well-formed answer.
//!
//! Two protocols share the loop: an eval protocol returning a single JSON
//! envelope with a strict three-line answer, and an interactive protocol
//! streaming typed progress events and a long-form report.

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod research;
pub mod tools;

pub use config::{Mode, ResearchConfig, RetryPolicy};
pub use error::ResearchError;
pub use models::{AnalysisResult, ChatRequest, ChatResponse, Confidence, Finding, ModelIds};
pub use research::Orchestrator;
pub use tools::Capabilities;
