//! Partition scoring: silhouette, inertia, bootstrap stability and per-cluster quality.

use std::collections::BTreeMap;

use keygraph_core::{
    ClusterId, ClusteringConfig, ClusteringError, QualityAssessment, Result, ValidationReport,
    NOISE_CLUSTER_ID,
};
use keygraph_vector::{cosine_distance_matrix, cosine_similarity_matrix};
use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::metrics::{inertia, members_by_cluster, silhouette_score};

const MIN_STABLE_SIZE: usize = 3;
const LOW_QUALITY: f32 = 0.4;
const GOOD_QUALITY: f32 = 0.5;
const UNSTABLE: f32 = 0.5;
const LOW_SILHOUETTE: f32 = 0.25;
const SMALL_CLUSTER_SHARE: f64 = 0.3;
const NOISE_SHARE: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct StatisticalValidator {
    iterations: usize,
    seed: u64,
}

impl Default for StatisticalValidator {
    fn default() -> Self {
        Self::new(5, 42)
    }
}

impl StatisticalValidator {
    pub fn new(iterations: usize, seed: u64) -> Self {
        Self { iterations, seed }
    }

    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self::new(config.bootstrap_iterations, config.random_seed)
    }

    pub fn validate(
        &self,
        keywords: &[String],
        embeddings: ArrayView2<'_, f32>,
        labels: &[ClusterId],
    ) -> Result<ValidationReport> {
        if labels.len() != keywords.len() {
            return Err(ClusteringError::InvalidInput(format!(
                "{} labels for {} keywords",
                labels.len(),
                keywords.len()
            )));
        }
        if keywords.is_empty() {
            return Ok(ValidationReport::default());
        }
        if embeddings.nrows() != keywords.len() {
            return Err(ClusteringError::DimensionMismatch {
                expected: keywords.len(),
                actual: embeddings.nrows(),
            });
        }

        let distances = cosine_distance_matrix(embeddings);
        let silhouette = silhouette_score(&distances, labels) as f32;
        let inertia = inertia(embeddings, labels);

        let members = members_by_cluster(labels);
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut stability = BTreeMap::new();
        let mut quality = BTreeMap::new();
        for (cluster, rows) in &members {
            if *cluster == NOISE_CLUSTER_ID {
                continue;
            }
            let sims = cosine_similarity_matrix(embeddings.select(Axis(0), rows).view());
            stability.insert(*cluster, self.stability(&sims, &mut rng));
            quality.insert(*cluster, Self::quality(&sims));
        }

        let overall_score = Self::overall(silhouette, &quality, &stability);
        let assessment = QualityAssessment::from_score(overall_score);
        let noise_count = members.get(&NOISE_CLUSTER_ID).map_or(0, Vec::len);
        let recommendations = Self::recommendations(
            silhouette,
            &members,
            &quality,
            &stability,
            noise_count,
            keywords.len(),
        );

        debug!(
            silhouette,
            inertia,
            overall_score,
            assessment = %assessment,
            "Validated clustering"
        );

        Ok(ValidationReport {
            silhouette,
            inertia,
            stability,
            quality,
            overall_score,
            assessment,
            recommendations,
        })
    }

    /// Bootstrap mean pairwise similarity over half-size samples drawn with
    /// replacement. Clusters under three members score 0.
    fn stability(&self, sims: &Array2<f32>, rng: &mut StdRng) -> f32 {
        let size = sims.nrows();
        if size < MIN_STABLE_SIZE || self.iterations == 0 {
            return 0.0;
        }
        let sample_size = (size / 2).max(2);
        let mut total = 0.0f64;
        for _ in 0..self.iterations {
            let sample: Vec<usize> = (0..sample_size).map(|_| rng.random_range(0..size)).collect();
            let mut sum = 0.0f64;
            let mut pairs = 0usize;
            for a in 0..sample.len() {
                for b in (a + 1)..sample.len() {
                    sum += sims[[sample[a], sample[b]]] as f64;
                    pairs += 1;
                }
            }
            let mean = if pairs > 0 { sum / pairs as f64 } else { 0.0 };
            total += mean.clamp(0.0, 1.0);
        }
        (total / self.iterations as f64) as f32
    }

    /// `mean · (1 − std)` over distinct member pairs; singletons score 0.
    fn quality(sims: &Array2<f32>) -> f32 {
        let size = sims.nrows();
        let pairs: Vec<f64> = (0..size)
            .flat_map(|i| ((i + 1)..size).map(move |j| (i, j)))
            .map(|(i, j)| sims[[i, j]] as f64)
            .collect();
        if pairs.is_empty() {
            return 0.0;
        }
        let mean = pairs.iter().sum::<f64>() / pairs.len() as f64;
        let variance = pairs.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / pairs.len() as f64;
        (mean * (1.0 - variance.sqrt())).clamp(0.0, 1.0) as f32
    }

    fn overall(
        silhouette: f32,
        quality: &BTreeMap<ClusterId, f32>,
        stability: &BTreeMap<ClusterId, f32>,
    ) -> f32 {
        let good_share = if quality.is_empty() {
            0.0
        } else {
            quality.values().filter(|q| **q > GOOD_QUALITY).count() as f32 / quality.len() as f32
        };
        let mean_stability = if stability.is_empty() {
            0.0
        } else {
            stability.values().sum::<f32>() / stability.len() as f32
        };
        (0.4 * silhouette.max(0.0) + 0.4 * good_share + 0.2 * mean_stability).clamp(0.0, 1.0)
    }

    fn recommendations(
        silhouette: f32,
        members: &BTreeMap<ClusterId, Vec<usize>>,
        quality: &BTreeMap<ClusterId, f32>,
        stability: &BTreeMap<ClusterId, f32>,
        noise_count: usize,
        total: usize,
    ) -> Vec<String> {
        let mut out = Vec::new();

        let low: Vec<String> = quality
            .iter()
            .filter(|(_, q)| **q < LOW_QUALITY)
            .map(|(id, _)| id.to_string())
            .collect();
        if !low.is_empty() {
            out.push(format!(
                "Clusters {} have low internal similarity; consider splitting or refining them",
                low.join(", ")
            ));
        }

        let clusters: Vec<&Vec<usize>> = members
            .iter()
            .filter(|(id, _)| **id != NOISE_CLUSTER_ID)
            .map(|(_, rows)| rows)
            .collect();
        let small = clusters.iter().filter(|rows| rows.len() < MIN_STABLE_SIZE).count();
        if !clusters.is_empty() && small as f64 / clusters.len() as f64 > SMALL_CLUSTER_SHARE {
            out.push(format!(
                "{small} of {} clusters have fewer than {MIN_STABLE_SIZE} keywords; consider a larger minimum cluster size or more keywords",
                clusters.len()
            ));
        }

        if clusters.len() >= 2 && silhouette < LOW_SILHOUETTE {
            out.push(format!(
                "Weak separation between clusters (silhouette {silhouette:.2}); try another clustering method"
            ));
        }

        if total > 0 && noise_count as f64 / total as f64 > NOISE_SHARE {
            out.push(format!(
                "{noise_count} of {total} keywords are unclustered; consider lowering the minimum cluster size"
            ));
        }

        let unstable: Vec<String> = stability
            .iter()
            .filter(|(id, s)| {
                members.get(id).map_or(0, Vec::len) >= MIN_STABLE_SIZE && **s < UNSTABLE
            })
            .map(|(id, _)| id.to_string())
            .collect();
        if !unstable.is_empty() {
            out.push(format!(
                "Clusters {} are unstable under resampling",
                unstable.join(", ")
            ));
        }

        if out.is_empty() {
            out.push("Clustering looks well-formed; no changes suggested".to_string());
        }
        out
    }
}
