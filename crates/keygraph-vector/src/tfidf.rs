use std::collections::BTreeMap;

use keygraph_core::Result;
use ndarray::Array2;
use tracing::{debug, warn};

use crate::providers::{EmbeddingProvider, MemoryUsage, ProviderCharacteristics};
use crate::svd::truncated_svd;

/// Statistical fallback: TF-IDF over word unigrams, reduced with truncated SVD.
///
/// Vocabulary and idf weights are fitted on each batch, so the output
/// dimension is `min(target_dimension, vocabulary, n - 1)` (at least one
/// column) and only comparable within a single call.
pub struct TfidfEmbeddingProvider {
    target_dimension: usize,
}

impl TfidfEmbeddingProvider {
    pub fn new(target_dimension: usize) -> Self {
        Self {
            target_dimension: target_dimension.max(1),
        }
    }

    /// Tokens of at least two characters, split on whitespace.
    fn tokens(keyword: &str) -> Vec<&str> {
        keyword
            .split_whitespace()
            .filter(|t| t.chars().count() >= 2)
            .collect()
    }

    /// L2-normalised TF-IDF matrix with smooth idf: `ln((1 + n) / (1 + df)) + 1`.
    pub fn tfidf_matrix(keywords: &[String]) -> (Array2<f64>, Vec<String>) {
        let n = keywords.len();
        let tokenized: Vec<Vec<&str>> = keywords.iter().map(|k| Self::tokens(k)).collect();

        let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for tokens in &tokenized {
            let mut seen: Vec<&str> = tokens.clone();
            seen.sort_unstable();
            seen.dedup();
            for t in seen {
                *document_frequency.entry(t).or_insert(0) += 1;
            }
        }

        let vocabulary: Vec<String> = document_frequency.keys().map(|t| t.to_string()).collect();
        let index: BTreeMap<&str, usize> = document_frequency
            .keys()
            .enumerate()
            .map(|(i, t)| (*t, i))
            .collect();
        let idf: Vec<f64> = document_frequency
            .values()
            .map(|&df| ((1.0 + n as f64) / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        let mut matrix = Array2::<f64>::zeros((n, vocabulary.len()));
        for (row, tokens) in tokenized.iter().enumerate() {
            for t in tokens {
                if let Some(&col) = index.get(t) {
                    matrix[[row, col]] += 1.0;
                }
            }
            let mut norm = 0.0;
            for col in 0..vocabulary.len() {
                let weighted = matrix[[row, col]] * idf[col];
                matrix[[row, col]] = weighted;
                norm += weighted * weighted;
            }
            let norm = norm.sqrt();
            if norm > 0.0 {
                matrix.row_mut(row).mapv_inplace(|x| x / norm);
            }
        }

        (matrix, vocabulary)
    }

    pub fn output_dimension(&self, rows: usize, features: usize) -> usize {
        self.target_dimension
            .min(features)
            .min(rows.saturating_sub(1))
            .max(1)
    }
}

impl EmbeddingProvider for TfidfEmbeddingProvider {
    fn generate(&self, keywords: &[String]) -> Result<Array2<f32>> {
        let n = keywords.len();
        if n == 0 {
            return Ok(Array2::zeros((0, self.target_dimension)));
        }

        let (matrix, vocabulary) = Self::tfidf_matrix(keywords);
        if vocabulary.is_empty() {
            warn!(
                keywords = n,
                "TF-IDF vocabulary is empty; emitting zero embeddings"
            );
            return Ok(Array2::zeros((n, 1)));
        }

        let components = self.output_dimension(n, vocabulary.len());
        debug!(
            keywords = n,
            features = vocabulary.len(),
            components,
            "Reducing TF-IDF matrix"
        );
        Ok(truncated_svd(&matrix, components)?)
    }

    fn dimension(&self) -> usize {
        self.target_dimension
    }

    fn provider_name(&self) -> &str {
        "tfidf-svd"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            requires_network: false,
            pretrained: false,
            memory_usage: MemoryUsage::Low,
        }
    }
}
