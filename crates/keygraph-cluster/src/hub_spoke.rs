use std::collections::BTreeMap;

use keygraph_core::{ClusterId, ClusteringConfig, ClusteringError, HubSpoke, Result};
use keygraph_vector::cosine_similarity_matrix;
use ndarray::{ArrayView2, Axis};

/// Picks each cluster's most central keyword (hub) and the members close to it (spokes).
#[derive(Debug, Clone)]
pub struct HubSpokeAnalyzer {
    hub_threshold: f32,
}

impl Default for HubSpokeAnalyzer {
    fn default() -> Self {
        Self::new(0.7)
    }
}

impl HubSpokeAnalyzer {
    pub fn new(hub_threshold: f32) -> Self {
        Self { hub_threshold }
    }

    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self::new(config.hub_threshold)
    }

    /// Hub and spokes for every non-empty cluster, noise included.
    ///
    /// `members` maps cluster ids to row indices into `keywords` and
    /// `embeddings`.
    pub fn analyze(
        &self,
        keywords: &[String],
        embeddings: ArrayView2<'_, f32>,
        members: &BTreeMap<ClusterId, Vec<usize>>,
    ) -> Result<BTreeMap<ClusterId, HubSpoke>> {
        let mut out = BTreeMap::new();
        for (cluster, rows) in members {
            if rows.is_empty() {
                continue;
            }
            if let Some(&bad) = rows.iter().find(|&&r| r >= keywords.len()) {
                return Err(ClusteringError::InvalidInput(format!(
                    "cluster {cluster} references keyword {bad} of {}",
                    keywords.len()
                )));
            }

            if rows.len() == 1 {
                out.insert(
                    *cluster,
                    HubSpoke {
                        hub: keywords[rows[0]].clone(),
                        spokes: Vec::new(),
                        coverage: 0.0,
                    },
                );
                continue;
            }

            if rows.iter().any(|&r| r >= embeddings.nrows()) {
                return Err(ClusteringError::DimensionMismatch {
                    expected: keywords.len(),
                    actual: embeddings.nrows(),
                });
            }
            let sub = embeddings.select(Axis(0), rows);
            let sims = cosine_similarity_matrix(sub.view());
            let size = rows.len();

            let mut hub = 0usize;
            let mut best = f64::NEG_INFINITY;
            for i in 0..size {
                let others: f64 = (0..size)
                    .filter(|&j| j != i)
                    .map(|j| sims[[i, j]] as f64)
                    .sum();
                let mean = others / (size - 1) as f64;
                if mean > best {
                    best = mean;
                    hub = i;
                }
            }

            let spokes: Vec<String> = (0..size)
                .filter(|&j| j != hub && sims[[hub, j]] >= self.hub_threshold)
                .map(|j| keywords[rows[j]].clone())
                .collect();
            let coverage = spokes.len() as f32 / (size - 1) as f32;

            out.insert(
                *cluster,
                HubSpoke {
                    hub: keywords[rows[hub]].clone(),
                    spokes,
                    coverage,
                },
            );
        }
        Ok(out)
    }
}
