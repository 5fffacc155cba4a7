//! Per-URL structured extraction with timeout, retry, and scrape fallback.

use crate::config::RetryPolicy;
use crate::models::Finding;
use crate::tools::{WebExtract, WebScrape};
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Hosts that never yield extractable facts (forums, video, social).
const BLOCKED_HOSTS: &[&str] = &[
    "reddit.com",
    "brainly.com",
    "youtube.com",
    "youtu.be",
    "facebook.com",
    "twitter.com",
    "x.com",
    "tiktok.com",
    "instagram.com",
];

const BLOCKED_EXTENSIONS: &[&str] = &[".pdf", ".doc", ".docx"];

/// Characters of scraped markdown kept when falling back from extraction.
const SCRAPE_FALLBACK_CHARS: usize = 2000;

/// Keep only URLs worth sending to the extract capability.
///
/// Search providers sometimes return scheme-less URLs; those are retried
/// with `https://` before being rejected as unparseable.
pub fn filter_extractable(urls: &[String]) -> Vec<String> {
    urls.iter()
        .filter(|u| is_extractable(u))
        .cloned()
        .collect()
}

fn is_extractable(raw: &str) -> bool {
    let parsed = match Url::parse(raw) {
        Ok(u) => u,
        Err(_) => match Url::parse(&format!("https://{raw}")) {
            Ok(u) => u,
            Err(_) => return false,
        },
    };
    let host = match parsed.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return false,
    };
    if BLOCKED_HOSTS.iter().any(|blocked| host.contains(blocked)) {
        return false;
    }
    let path = parsed.path().to_ascii_lowercase();
    !BLOCKED_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Success payloads that carry no facts: empty strings/collections, or the
/// provider's `"names":[]` no-match sentinel. The sentinel check is a
/// substring scan of the serialized payload and may overmatch.
pub fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty() || value.to_string().contains(r#""names":[]"#),
        _ => false,
    }
}

/// Flatten an extract payload into findings for one URL. A list payload
/// maps per item (unwrapping a `data` field when present); a string payload
/// is a single finding; any other object is serialized whole.
pub fn normalize_payload(value: &Value, url: &str) -> Vec<Finding> {
    let finding = |text: String| Finding {
        text,
        source: url.to_string(),
    };
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![finding(s.clone())],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let inner = item.get("data").unwrap_or(item);
                let text = match inner {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let trimmed = text.trim();
                (!trimmed.is_empty() && trimmed != "null").then(|| finding(text.clone()))
            })
            .collect(),
        Value::Object(_) => vec![finding(value.to_string())],
        _ => Vec::new(),
    }
}

pub struct Extractor {
    extract: Arc<dyn WebExtract>,
    scrape: Arc<dyn WebScrape>,
    timeout: Duration,
    retry: RetryPolicy,
    inter_url_pause: Duration,
}

impl Extractor {
    pub fn new(
        extract: Arc<dyn WebExtract>,
        scrape: Arc<dyn WebScrape>,
        timeout: Duration,
        retry: RetryPolicy,
        inter_url_pause: Duration,
    ) -> Self {
        Self {
            extract,
            scrape,
            timeout,
            retry,
            inter_url_pause,
        }
    }

    /// Extract one URL. Degrades through scrape fallback to `[]`; never
    /// fails.
    pub async fn extract(&self, url: &str, prompt: &str) -> Vec<Finding> {
        let urls = [url.to_string()];
        for attempt in 0..self.retry.attempts() {
            if attempt > 0 {
                tokio::time::sleep(self.retry.delay(attempt - 1)).await;
            }
            match tokio::time::timeout(self.timeout, self.extract.extract(&urls, prompt)).await {
                Ok(Ok(payload)) => {
                    if is_empty_payload(&payload) {
                        debug!(url, "extract returned empty payload, trying scrape");
                        return self.scrape_fallback(url).await;
                    }
                    return normalize_payload(&payload, url);
                }
                Ok(Err(e)) => {
                    warn!(url, attempt, error = %e, "extract attempt failed");
                }
                Err(_) => {
                    warn!(url, attempt, timeout = ?self.timeout, "extract timed out");
                }
            }
        }
        Vec::new()
    }

    async fn scrape_fallback(&self, url: &str) -> Vec<Finding> {
        match self.scrape.scrape(url).await {
            Ok(markdown) => {
                let text: String = markdown.chars().take(SCRAPE_FALLBACK_CHARS).collect();
                if text.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![Finding {
                        text,
                        source: url.to_string(),
                    }]
                }
            }
            Err(e) => {
                warn!(url, error = %e, "scrape fallback failed");
                Vec::new()
            }
        }
    }

    /// Filter, then extract each URL sequentially with a pause between
    /// URLs. Aggregates all non-empty results.
    pub async fn extract_many(&self, urls: &[String], prompt: &str) -> Vec<Finding> {
        let targets = filter_extractable(urls);
        let mut findings = Vec::new();
        for (i, url) in targets.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.inter_url_pause).await;
            }
            findings.extend(self.extract(url, prompt).await);
        }
        findings
    }

    /// Filter, then extract all URLs concurrently, merging results in input
    /// order.
    pub async fn extract_many_parallel(&self, urls: &[String], prompt: &str) -> Vec<Finding> {
        let targets = filter_extractable(urls);
        let futures = targets.iter().map(|url| self.extract(url, prompt));
        join_all(futures).await.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResearchError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn owned(urls: &[&str]) -> Vec<String> {
        urls.iter().map(|u| u.to_string()).collect()
    }

    #[test]
    fn filter_rejects_blocked_hosts() {
        let urls = owned(&[
            "https://www.reddit.com/r/history/comments/abc",
            "https://x.com/someone/status/1",
            "https://youtu.be/abc123",
            "https://en.wikipedia.org/wiki/Civil_Rights_Act_of_1964",
        ]);
        assert_eq!(
            filter_extractable(&urls),
            owned(&["https://en.wikipedia.org/wiki/Civil_Rights_Act_of_1964"])
        );
    }

    #[test]
    fn filter_rejects_document_paths_case_insensitively() {
        let urls = owned(&[
            "https://example.com/report.PDF",
            "https://example.com/notes.docx",
            "https://example.com/page.html",
        ]);
        assert_eq!(filter_extractable(&urls), owned(&["https://example.com/page.html"]));
    }

    #[test]
    fn filter_accepts_scheme_less_urls() {
        let urls = owned(&["en.wikipedia.org/wiki/Some_Page", "not a url at all \u{7f}"]);
        assert_eq!(filter_extractable(&urls), owned(&["en.wikipedia.org/wiki/Some_Page"]));
    }

    #[test]
    fn empty_payload_detection() {
        assert!(is_empty_payload(&json!(null)));
        assert!(is_empty_payload(&json!("")));
        assert!(is_empty_payload(&json!([])));
        assert!(is_empty_payload(&json!({})));
        assert!(is_empty_payload(&json!({"names": [], "context": "none"})));
        assert!(!is_empty_payload(&json!({"names": ["LBJ"]})));
        assert!(!is_empty_payload(&json!("some text")));
    }

    #[test]
    fn normalize_maps_lists_strings_and_objects() {
        let url = "https://example.com";
        assert_eq!(
            normalize_payload(&json!("plain text"), url),
            vec![Finding {
                text: "plain text".to_string(),
                source: url.to_string()
            }]
        );

        let list = json!([{"data": "first"}, {"data": {"k": "v"}}, "third"]);
        let findings = normalize_payload(&list, url);
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].text, "first");
        assert!(findings[1].text.contains("\"k\""));
        assert_eq!(findings[2].text, "third");

        let object = json!({"entityName": "LBJ"});
        let findings = normalize_payload(&object, url);
        assert_eq!(findings.len(), 1);
        assert!(findings[0].text.contains("entityName"));
    }

    struct ScriptedExtract {
        payload: Value,
        fail_first: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl WebExtract for ScriptedExtract {
        async fn extract(&self, _urls: &[String], _prompt: &str) -> Result<Value, ResearchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(ResearchError::Capability("boom".into()))
            } else {
                Ok(self.payload.clone())
            }
        }
    }

    struct StaticScrape(String);

    #[async_trait]
    impl WebScrape for StaticScrape {
        async fn scrape(&self, _url: &str) -> Result<String, ResearchError> {
            Ok(self.0.clone())
        }
    }

    fn extractor(extract: Arc<dyn WebExtract>, scrape: Arc<dyn WebScrape>) -> Extractor {
        Extractor::new(
            extract,
            scrape,
            Duration::from_secs(35),
            RetryPolicy::exponential(2, 1000, 2),
            Duration::from_secs(2),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let extract = Arc::new(ScriptedExtract {
            payload: json!("found it"),
            fail_first: 2,
            calls: AtomicUsize::new(0),
        });
        let ex = extractor(extract.clone(), Arc::new(StaticScrape(String::new())));
        let findings = ex.extract("https://example.com", "prompt").await;
        assert_eq!(findings.len(), 1);
        assert_eq!(extract.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retries() {
        let extract = Arc::new(ScriptedExtract {
            payload: json!("unreachable"),
            fail_first: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let ex = extractor(extract, Arc::new(StaticScrape("page".into())));
        assert!(ex.extract("https://example.com", "prompt").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_payload_falls_back_to_scrape() {
        let extract = Arc::new(ScriptedExtract {
            payload: json!({"names": []}),
            fail_first: 0,
            calls: AtomicUsize::new(0),
        });
        let long_page = "x".repeat(5000);
        let ex = extractor(extract, Arc::new(StaticScrape(long_page)));
        let findings = ex.extract("https://example.com", "prompt").await;
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].text.chars().count(), SCRAPE_FALLBACK_CHARS);
    }

    #[tokio::test(start_paused = true)]
    async fn extract_many_filters_everything_blocked() {
        let extract = Arc::new(ScriptedExtract {
            payload: json!("should never be called"),
            fail_first: 0,
            calls: AtomicUsize::new(0),
        });
        let ex = extractor(extract.clone(), Arc::new(StaticScrape(String::new())));
        let urls = owned(&["https://reddit.com/r/x", "https://x.com/y", "https://youtube.com/z"]);
        assert!(ex.extract_many(&urls, "prompt").await.is_empty());
        assert_eq!(extract.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn parallel_path_merges_in_input_order() {
        let extract = Arc::new(ScriptedExtract {
            payload: json!("fact"),
            fail_first: 0,
            calls: AtomicUsize::new(0),
        });
        let ex = extractor(extract, Arc::new(StaticScrape(String::new())));
        let urls = owned(&["https://a.example", "https://b.example"]);
        let findings = ex.extract_many_parallel(&urls, "prompt").await;
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].source, "https://a.example");
        assert_eq!(findings[1].source, "https://b.example");
    }
}
