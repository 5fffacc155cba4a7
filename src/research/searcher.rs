//! Search with retry and linear backoff.

use crate::config::RetryPolicy;
use crate::error::ResearchError;
use crate::models::SearchResult;
use crate::tools::WebSearch;
use std::sync::Arc;
use tracing::warn;

pub struct Searcher {
    web: Arc<dyn WebSearch>,
    policy: RetryPolicy,
}

impl Searcher {
    pub fn new(web: Arc<dyn WebSearch>, policy: RetryPolicy) -> Self {
        Self { web, policy }
    }

    /// Run one query with up to `max_retries` retries.
    ///
    /// An empty result list is a success. Only transport/provider failures
    /// are retried; after the final attempt the error is `SearchExhausted`.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ResearchError> {
        let mut last_error = String::new();
        for attempt in 0..self.policy.attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.policy.delay(attempt - 1)).await;
            }
            match self.web.search(query).await {
                Ok(results) => return Ok(results),
                Err(e) => {
                    warn!(query, attempt, error = %e, "search attempt failed");
                    last_error = e.to_string();
                }
            }
        }
        Err(ResearchError::SearchExhausted {
            attempts: self.policy.attempts(),
            message: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakySearch {
        calls: AtomicUsize,
        succeed_on: usize,
    }

    #[async_trait]
    impl WebSearch for FlakySearch {
        async fn search(&self, _query: &str) -> Result<Vec<SearchResult>, ResearchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call + 1 >= self.succeed_on {
                Ok(vec![SearchResult {
                    url: "https://example.com".to_string(),
                    ..Default::default()
                }])
            } else {
                Err(ResearchError::SearchTransient("connection reset".into()))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let web = Arc::new(FlakySearch {
            calls: AtomicUsize::new(0),
            succeed_on: 3,
        });
        let searcher = Searcher::new(web.clone(), RetryPolicy::linear(3, 2000));
        let results = searcher.search("anything").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(web.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_all_attempts() {
        let web = Arc::new(FlakySearch {
            calls: AtomicUsize::new(0),
            succeed_on: usize::MAX,
        });
        let searcher = Searcher::new(web.clone(), RetryPolicy::linear(3, 2000));
        let err = searcher.search("anything").await.unwrap_err();
        assert!(matches!(
            err,
            ResearchError::SearchExhausted { attempts: 4, .. }
        ));
        assert_eq!(web.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn empty_results_are_success() {
        struct EmptySearch;
        #[async_trait]
        impl WebSearch for EmptySearch {
            async fn search(&self, _query: &str) -> Result<Vec<SearchResult>, ResearchError> {
                Ok(Vec::new())
            }
        }
        let searcher = Searcher::new(Arc::new(EmptySearch), RetryPolicy::linear(3, 2000));
        assert!(searcher.search("anything").await.unwrap().is_empty());
    }
}
