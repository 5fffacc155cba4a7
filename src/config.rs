//! Research loop configuration.

use std::time::Duration;

/// Which response protocol the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Single JSON response with the three-line answer.
    Eval,
    /// Streaming progress events terminated by a long-form report.
    Interactive,
}

/// Retry schedule for an external call.
///
/// `delay(i)` is the sleep before retry `i` (0-based): linear
/// `base_ms * (i + 1)` when `exponent_base` is unset, otherwise
/// `base_ms * exponent_base^i`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_ms: u64,
    pub exponent_base: Option<u32>,
}

impl RetryPolicy {
    pub fn linear(max_retries: usize, base_ms: u64) -> Self {
        Self {
            max_retries,
            base_ms,
            exponent_base: None,
        }
    }

    pub fn exponential(max_retries: usize, base_ms: u64, exponent_base: u32) -> Self {
        Self {
            max_retries,
            base_ms,
            exponent_base: Some(exponent_base),
        }
    }

    /// Total attempts including the initial one.
    pub fn attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Sleep before retry `i` (0-based).
    pub fn delay(&self, retry: usize) -> Duration {
        let ms = match self.exponent_base {
            Some(base) => self.base_ms.saturating_mul(u64::from(base).pow(retry as u32)),
            None => self.base_ms.saturating_mul(retry as u64 + 1),
        };
        Duration::from_millis(ms)
    }
}

/// Tunable bounds for one research run.
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    pub mode: Mode,
    /// Maximum number of hops.
    pub max_depth: usize,
    /// Wall-clock budget for the whole loop, checked at hop entry.
    pub time_limit: Duration,
    /// Total failure-continues before the loop aborts to synthesis.
    pub max_failed_attempts: usize,
    /// Search queries issued per hop to build frequency statistics.
    pub searches_per_hop: usize,
    /// URLs handed to the extractor per hop.
    pub urls_per_hop: usize,
    /// Hard timeout for a single extract call.
    pub extract_timeout: Duration,
    pub search_retry: RetryPolicy,
    pub extract_retry: RetryPolicy,
    pub inter_search_pause: Duration,
    pub inter_url_pause: Duration,
    pub inter_hop_pause: Duration,
}

impl ResearchConfig {
    pub fn eval() -> Self {
        Self {
            mode: Mode::Eval,
            max_depth: 6,
            time_limit: Duration::from_millis(210_000),
            max_failed_attempts: 3,
            searches_per_hop: 5,
            urls_per_hop: 3,
            extract_timeout: Duration::from_secs(35),
            search_retry: RetryPolicy::linear(3, 2000),
            extract_retry: RetryPolicy::exponential(2, 1000, 2),
            inter_search_pause: Duration::from_secs(1),
            inter_url_pause: Duration::from_secs(2),
            inter_hop_pause: Duration::from_secs(2),
        }
    }

    pub fn interactive() -> Self {
        Self {
            mode: Mode::Interactive,
            max_depth: 7,
            searches_per_hop: 1,
            ..Self::eval()
        }
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = limit;
        self
    }

    /// Clamp the time budget to an outer wall limit (e.g. `MAX_DURATION`).
    pub fn clamp_time_limit(mut self, outer: Duration) -> Self {
        self.time_limit = self.time_limit.min(outer);
        self
    }

    /// Steps advertised to the progress stream: five phases per hop.
    pub fn total_expected_steps(&self) -> usize {
        self.max_depth * 5
    }
}
