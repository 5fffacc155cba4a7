//! Cross-query URL frequency ranking.
//!
//! URLs that keep showing up across repeated searches of the same topic are
//! the ones worth extracting first.

use crate::models::{RankedUrl, SearchResult};
use std::collections::{HashMap, HashSet};

/// Occurrence counts per URL, in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct UrlFrequencyRanker {
    entries: Vec<RankedUrl>,
    index: HashMap<String, usize>,
}

impl UrlFrequencyRanker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one search response. A URL counts at most once per response,
    /// so `frequency` is the number of responses that mentioned it.
    pub fn observe(&mut self, results: &[SearchResult]) {
        let mut seen_this_response = HashSet::new();
        for result in results {
            if result.url.is_empty() || !seen_this_response.insert(result.url.as_str()) {
                continue;
            }
            match self.index.get(&result.url) {
                Some(&i) => self.entries[i].frequency += 1,
                None => {
                    self.index.insert(result.url.clone(), self.entries.len());
                    self.entries.push(RankedUrl {
                        url: result.url.clone(),
                        frequency: 1,
                        title: (!result.title.is_empty()).then(|| result.title.clone()),
                    });
                }
            }
        }
    }

    /// Top `n` URLs by frequency (ties keep first-seen order), skipping any
    /// already processed.
    pub fn select_top_unseen(&self, n: usize, processed: &HashSet<String>) -> Vec<String> {
        let mut ranked: Vec<&RankedUrl> = self.entries.iter().collect();
        ranked.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        ranked
            .into_iter()
            .filter(|entry| !processed.contains(&entry.url))
            .take(n)
            .map(|entry| entry.url.clone())
            .collect()
    }

    pub fn frequency_of(&self, url: &str) -> usize {
        self.index
            .get(url)
            .map(|&i| self.entries[i].frequency)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(urls: &[&str]) -> Vec<SearchResult> {
        urls.iter()
            .map(|u| SearchResult {
                url: u.to_string(),
                title: format!("title {u}"),
                description: String::new(),
            })
            .collect()
    }

    #[test]
    fn frequency_counts_responses_not_occurrences() {
        let mut ranker = UrlFrequencyRanker::new();
        ranker.observe(&results(&["a", "a", "b"]));
        ranker.observe(&results(&["a"]));
        assert_eq!(ranker.frequency_of("a"), 2);
        assert_eq!(ranker.frequency_of("b"), 1);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let mut ranker = UrlFrequencyRanker::new();
        ranker.observe(&results(&["a", "b", "c"]));
        ranker.observe(&results(&["b", "c", "d"]));

        let processed = HashSet::new();
        let top = ranker.select_top_unseen(3, &processed);
        // b and c tied at 2 in first-seen order, then the freq-1 group
        assert_eq!(top[0], "b");
        assert_eq!(top[1], "c");
        assert!(top[2] == "a" || top[2] == "d");
    }

    #[test]
    fn processed_urls_never_reappear() {
        let mut ranker = UrlFrequencyRanker::new();
        ranker.observe(&results(&["a", "b", "c"]));

        let mut processed = HashSet::new();
        processed.extend(ranker.select_top_unseen(2, &processed));
        let rest = ranker.select_top_unseen(3, &processed);
        assert_eq!(rest, vec!["c".to_string()]);

        processed.extend(rest);
        assert!(ranker.select_top_unseen(3, &processed).is_empty());
    }

    #[test]
    fn titles_stick_from_first_sighting() {
        let mut ranker = UrlFrequencyRanker::new();
        ranker.observe(&results(&["a"]));
        assert_eq!(ranker.len(), 1);
        assert!(!ranker.is_empty());
    }
}
