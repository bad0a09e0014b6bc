use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use keygraph_core::text::{normalize_keyword, title_case, tokenize};
use keygraph_core::{ClusterId, ClusteringConfig, NOISE_CLUSTER_ID, NOISE_LABEL};
use tracing::{debug, warn};

/// Built-in English stop-word list.
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his",
    "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me", "more", "most",
    "my", "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our",
    "ours", "out", "over", "own", "same", "she", "should", "so", "some", "such", "than", "that",
    "the", "their", "theirs", "them", "then", "there", "these", "they", "this", "those", "through",
    "to", "too", "under", "until", "up", "very", "was", "we", "were", "what", "when", "where",
    "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours",
];

/// Frequency table that remembers first-occurrence order.
#[derive(Default)]
struct Counter {
    index: BTreeMap<String, usize>,
    entries: Vec<(String, usize)>,
}

impl Counter {
    fn add(&mut self, term: String) {
        match self.index.get(&term) {
            Some(&i) => self.entries[i].1 += 1,
            None => {
                self.index.insert(term.clone(), self.entries.len());
                self.entries.push((term, 1));
            }
        }
    }

    /// Most frequent term with at least `min` occurrences; ties keep the earliest.
    fn most_common(&self, min: usize) -> Option<&str> {
        let mut best: Option<&(String, usize)> = None;
        for entry in &self.entries {
            if entry.1 >= min && best.map_or(true, |b| entry.1 > b.1) {
                best = Some(entry);
            }
        }
        best.map(|(term, _)| term.as_str())
    }
}

/// Derives a short human-readable label per cluster from member n-grams.
#[derive(Debug, Clone)]
pub struct ClusterLabeler {
    stop_words: HashSet<String>,
    min_frequency: usize,
}

impl Default for ClusterLabeler {
    fn default() -> Self {
        Self::new(2)
    }
}

impl ClusterLabeler {
    pub fn new(min_frequency: usize) -> Self {
        Self {
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            min_frequency: min_frequency.max(1),
        }
    }

    pub fn with_stop_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stop_words = words
            .into_iter()
            .map(|w| normalize_keyword(w.as_ref()))
            .filter(|w| !w.is_empty())
            .collect();
        self
    }

    /// Labeler from config; an unreadable stop-word file falls back to the
    /// built-in list.
    pub fn from_config(config: &ClusteringConfig) -> Self {
        let labeler = Self::new(config.label_min_frequency);
        match &config.stop_words_file {
            Some(path) => match Self::read_stop_words(path) {
                Ok(words) => {
                    debug!(path = %path.display(), count = words.len(), "Loaded stop words");
                    labeler.with_stop_words(words)
                }
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "Could not read stop-word file; using built-in list"
                    );
                    labeler
                }
            },
            None => labeler,
        }
    }

    /// One stop word per line; blank lines and `#` comments are ignored.
    pub fn read_stop_words(path: &Path) -> std::io::Result<Vec<String>> {
        let content = std::fs::read_to_string(path)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    fn is_stop_word(&self, token: &str) -> bool {
        self.stop_words.contains(token)
    }

    pub fn label_cluster(&self, members: &[String]) -> Option<String> {
        let mut unigrams = Counter::default();
        let mut bigrams = Counter::default();

        for member in members {
            let tokens = tokenize(member);
            for token in &tokens {
                if token.chars().count() > 1 && !self.is_stop_word(token) {
                    unigrams.add(token.clone());
                }
            }
            for pair in tokens.windows(2) {
                if !(self.is_stop_word(&pair[0]) && self.is_stop_word(&pair[1])) {
                    bigrams.add(format!("{} {}", pair[0], pair[1]));
                }
            }
        }

        let chosen = bigrams
            .most_common(self.min_frequency)
            .or_else(|| unigrams.most_common(1))
            .map(str::to_string)
            .or_else(|| {
                members
                    .iter()
                    .map(|m| normalize_keyword(m))
                    .find(|m| !m.is_empty())
            })?;
        Some(title_case(&chosen))
    }

    /// Labels for every cluster; noise is always `Miscellaneous`.
    pub fn label(&self, members_by_cluster: &BTreeMap<ClusterId, Vec<String>>) -> BTreeMap<ClusterId, String> {
        members_by_cluster
            .iter()
            .map(|(id, members)| {
                let label = if *id == NOISE_CLUSTER_ID {
                    NOISE_LABEL.to_string()
                } else {
                    self.label_cluster(members)
                        .unwrap_or_else(|| format!("Cluster {id}"))
                };
                (*id, label)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_frequent_bigram_wins() {
        let labeler = ClusterLabeler::default();
        let label = labeler.label_cluster(&members(&[
            "pipe repair service",
            "pipe repair cost",
            "leak repair",
        ]));
        assert_eq!(label.as_deref(), Some("Pipe Repair"));
    }

    #[test]
    fn test_unigram_fallback() {
        let labeler = ClusterLabeler::default();
        let label = labeler.label_cluster(&members(&[
            "best restaurant",
            "top restaurant",
            "restaurant near me",
        ]));
        assert_eq!(label.as_deref(), Some("Restaurant"));
    }

    #[test]
    fn test_ties_keep_first_occurrence() {
        let labeler = ClusterLabeler::default();
        assert_eq!(
            labeler.label_cluster(&members(&["sofa", "couch"])).as_deref(),
            Some("Sofa")
        );
    }

    #[test]
    fn test_stop_words_only_falls_back_to_member() {
        let labeler = ClusterLabeler::default();
        assert_eq!(
            labeler.label_cluster(&members(&["  the  ", "of a"])).as_deref(),
            Some("The")
        );
    }

    #[test]
    fn test_noise_and_empty_labels() {
        let labeler = ClusterLabeler::default();
        let mut clusters = BTreeMap::new();
        clusters.insert(NOISE_CLUSTER_ID, members(&["plumbing repair"]));
        clusters.insert(4, Vec::new());
        let labels = labeler.label(&clusters);
        assert_eq!(labels[&NOISE_CLUSTER_ID], "Miscellaneous");
        assert_eq!(labels[&4], "Cluster 4");
    }

    #[test]
    fn test_custom_stop_words() {
        let labeler = ClusterLabeler::new(2).with_stop_words(["restaurant"]);
        let label = labeler.label_cluster(&members(&["best restaurant", "best restaurant deals"]));
        assert_eq!(label.as_deref(), Some("Best Restaurant"));

        let label = labeler.label_cluster(&members(&["restaurant guide", "restaurant menu"]));
        assert_eq!(label.as_deref(), Some("Guide"));
    }
}
