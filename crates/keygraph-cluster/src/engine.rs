use std::sync::Arc;

use keygraph_core::text::normalize_keyword;
use keygraph_core::{ClusterId, ClusteringConfig, ClusteringError, ClusteringMethod, Result};
use keygraph_vector::{normalize_rows, EmbeddingService};
use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::algorithms::{Agglomerative, ClusteringAlgorithm, Hdbscan, KMeans};

/// Rows closer than this to the first row count as the same point.
const IDENTICAL_TOLERANCE: f32 = 1e-6;

/// Labels, the embeddings they were computed from, and the method that produced them.
#[derive(Debug, Clone)]
pub struct ClusterOutput {
    pub labels: Vec<ClusterId>,
    pub embeddings: Array2<f32>,
    pub method: ClusteringMethod,
}

/// Embeds keywords and clusters them through a prioritized algorithm chain.
pub struct ClusterEngine {
    algorithms: Vec<Box<dyn ClusteringAlgorithm>>,
    embedding: Arc<EmbeddingService>,
}

impl ClusterEngine {
    /// Engine with the built-in density, centroid and hierarchical backends, in that order.
    pub fn new(config: &ClusteringConfig, embedding: Arc<EmbeddingService>) -> Self {
        let algorithms: Vec<Box<dyn ClusteringAlgorithm>> = vec![
            Box::new(Hdbscan::from_config(config)),
            Box::new(KMeans::from_config(config)),
            Box::new(Agglomerative::from_config(config)),
        ];
        Self::with_algorithms(algorithms, embedding)
    }

    pub fn with_algorithms(
        algorithms: Vec<Box<dyn ClusteringAlgorithm>>,
        embedding: Arc<EmbeddingService>,
    ) -> Self {
        Self {
            algorithms,
            embedding,
        }
    }

    pub fn embedding_service(&self) -> &Arc<EmbeddingService> {
        &self.embedding
    }

    /// Normalize keywords and embed them with the active backend.
    pub fn embed(&self, keywords: &[String]) -> Result<Array2<f32>> {
        let normalized: Vec<String> = keywords.iter().map(|k| normalize_keyword(k)).collect();
        self.embedding.generate(&normalized)
    }

    pub fn cluster(
        &self,
        keywords: &[String],
        method: ClusteringMethod,
    ) -> Result<(Vec<ClusterId>, Array2<f32>)> {
        let output = self.cluster_detailed(keywords, method)?;
        Ok((output.labels, output.embeddings))
    }

    pub fn cluster_detailed(
        &self,
        keywords: &[String],
        method: ClusteringMethod,
    ) -> Result<ClusterOutput> {
        let n = keywords.len();
        if n < 2 {
            return Ok(ClusterOutput {
                labels: vec![0; n],
                embeddings: Array2::zeros((0, 0)),
                method,
            });
        }

        let embeddings = self.embed(keywords)?;
        if embeddings.nrows() != n {
            return Err(ClusteringError::DimensionMismatch {
                expected: n,
                actual: embeddings.nrows(),
            });
        }
        info!(
            keywords = n,
            dimension = embeddings.ncols(),
            provider = self.embedding.provider_name().unwrap_or("unknown"),
            "Generated embeddings"
        );

        let (labels, method) = self.cluster_embeddings(&embeddings, method)?;
        Ok(ClusterOutput {
            labels,
            embeddings,
            method,
        })
    }

    /// Cluster precomputed embeddings, returning the method that succeeded.
    pub fn cluster_embeddings(
        &self,
        embeddings: &Array2<f32>,
        method: ClusteringMethod,
    ) -> Result<(Vec<ClusterId>, ClusteringMethod)> {
        let n = embeddings.nrows();
        if n < 2 {
            return Ok((vec![0; n], method));
        }
        if Self::all_identical(embeddings) {
            debug!(keywords = n, "All embeddings identical; using a single cluster");
            return Ok((vec![0; n], method));
        }

        let mut last_error: Option<ClusteringError> = None;
        for algorithm in self.attempt_order(method) {
            if !algorithm.is_available() {
                warn!(algorithm = algorithm.name(), "Clustering backend unavailable, skipping");
                continue;
            }
            match algorithm.fit(embeddings) {
                Ok(labels) if labels.len() == n => {
                    if algorithm.method() != method {
                        warn!(
                            requested = %method,
                            used = algorithm.name(),
                            "Fell back to another clustering method"
                        );
                    }
                    return Ok((labels, algorithm.method()));
                }
                Ok(labels) => {
                    warn!(
                        algorithm = algorithm.name(),
                        expected = n,
                        actual = labels.len(),
                        "Clustering backend returned the wrong number of labels"
                    );
                    last_error = Some(ClusteringError::Algorithm(format!(
                        "{} returned {} labels for {} points",
                        algorithm.name(),
                        labels.len(),
                        n
                    )));
                }
                Err(e) => {
                    warn!(algorithm = algorithm.name(), error = %e, "Clustering backend failed");
                    last_error = Some(e);
                }
            }
        }

        Err(ClusteringError::ClusteringUnavailable {
            source: last_error.map(Box::new),
        })
    }

    /// Requested method first, then the remaining backends in priority order.
    fn attempt_order(&self, method: ClusteringMethod) -> Vec<&dyn ClusteringAlgorithm> {
        let mut methods = vec![method];
        methods.extend(
            ClusteringMethod::priority_order()
                .into_iter()
                .filter(|m| *m != method),
        );

        let mut order: Vec<&dyn ClusteringAlgorithm> = Vec::new();
        for m in methods {
            order.extend(
                self.algorithms
                    .iter()
                    .filter(|a| a.method() == m)
                    .map(|a| a.as_ref()),
            );
        }
        order
    }

    fn all_identical(embeddings: &Array2<f32>) -> bool {
        let normalized = normalize_rows(embeddings.view());
        let first = normalized.row(0);
        normalized.outer_iter().skip(1).all(|row| {
            row.iter()
                .zip(first.iter())
                .all(|(a, b)| (a - b).abs() <= IDENTICAL_TOLERANCE)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygraph_vector::{EmbeddingProvider, TfidfEmbeddingProvider};
    use ndarray::array;

    struct FixedAlgorithm {
        method: ClusteringMethod,
        available: bool,
        fail: bool,
    }

    impl ClusteringAlgorithm for FixedAlgorithm {
        fn method(&self) -> ClusteringMethod {
            self.method
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn fit(&self, embeddings: &Array2<f32>) -> Result<Vec<ClusterId>> {
            if self.fail {
                return Err(ClusteringError::Algorithm(format!("{} failed", self.method)));
            }
            Ok((0..embeddings.nrows()).map(|i| (i % 2) as ClusterId).collect())
        }
    }

    fn stub(method: ClusteringMethod, available: bool, fail: bool) -> Box<dyn ClusteringAlgorithm> {
        Box::new(FixedAlgorithm {
            method,
            available,
            fail,
        })
    }

    fn tfidf_service() -> Arc<EmbeddingService> {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(TfidfEmbeddingProvider::new(384));
        Arc::new(EmbeddingService::new(vec![provider]))
    }

    fn spread() -> Array2<f32> {
        array![[1.0f32, 0.0], [0.0, 1.0], [0.7, 0.7], [1.0, 0.2]]
    }

    #[test]
    fn test_requested_method_runs_first() {
        let engine = ClusterEngine::with_algorithms(
            vec![
                stub(ClusteringMethod::Hdbscan, true, false),
                stub(ClusteringMethod::KMeans, true, false),
            ],
            tfidf_service(),
        );
        let (_, used) = engine
            .cluster_embeddings(&spread(), ClusteringMethod::KMeans)
            .unwrap();
        assert_eq!(used, ClusteringMethod::KMeans);
    }

    #[test]
    fn test_falls_back_past_unavailable_and_failing() {
        let engine = ClusterEngine::with_algorithms(
            vec![
                stub(ClusteringMethod::Hdbscan, false, false),
                stub(ClusteringMethod::KMeans, true, true),
                stub(ClusteringMethod::Agglomerative, true, false),
            ],
            tfidf_service(),
        );
        let (labels, used) = engine
            .cluster_embeddings(&spread(), ClusteringMethod::Hdbscan)
            .unwrap();
        assert_eq!(used, ClusteringMethod::Agglomerative);
        assert_eq!(labels, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_all_failing_chains_last_cause() {
        let engine = ClusterEngine::with_algorithms(
            vec![
                stub(ClusteringMethod::Hdbscan, true, true),
                stub(ClusteringMethod::KMeans, false, false),
            ],
            tfidf_service(),
        );
        let err = engine
            .cluster_embeddings(&spread(), ClusteringMethod::Hdbscan)
            .unwrap_err();
        match err {
            ClusteringError::ClusteringUnavailable { source: Some(cause) } => {
                assert!(matches!(*cause, ClusteringError::Algorithm(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_identical_embeddings_form_one_cluster() {
        let engine = ClusterEngine::with_algorithms(Vec::new(), tfidf_service());
        let same = array![[0.5f32, 0.5], [1.0, 1.0], [2.0, 2.0]];
        let (labels, _) = engine
            .cluster_embeddings(&same, ClusteringMethod::Hdbscan)
            .unwrap();
        assert_eq!(labels, vec![0, 0, 0]);
    }

    #[test]
    fn test_fewer_than_two_keywords() {
        let engine = ClusterEngine::new(&ClusteringConfig::default(), tfidf_service());
        let (labels, embeddings) = engine
            .cluster(&["solo".to_string()], ClusteringMethod::KMeans)
            .unwrap();
        assert_eq!(labels, vec![0]);
        assert_eq!(embeddings.nrows(), 0);

        let (labels, _) = engine.cluster(&[], ClusteringMethod::Hdbscan).unwrap();
        assert!(labels.is_empty());
    }
}
