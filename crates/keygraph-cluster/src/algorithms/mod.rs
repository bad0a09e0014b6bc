pub mod agglomerative;
pub mod hdbscan;
pub mod kmeans;
pub mod selection;

use std::collections::BTreeMap;

use keygraph_core::{ClusterId, ClusteringMethod, Result, NOISE_CLUSTER_ID};
use ndarray::Array2;

pub use agglomerative::Agglomerative;
pub use hdbscan::Hdbscan;
pub use kmeans::KMeans;

/// A clustering backend the engine can fall back through.
pub trait ClusteringAlgorithm: Send + Sync {
    fn method(&self) -> ClusteringMethod;

    fn name(&self) -> &str {
        self.method().as_str()
    }

    /// Capability check; backends that depend on optional runtime support
    /// report `false` and are skipped.
    fn is_available(&self) -> bool {
        true
    }

    /// One label per embedding row; `-1` marks noise.
    fn fit(&self, embeddings: &Array2<f32>) -> Result<Vec<ClusterId>>;
}

/// Renumber cluster labels `0, 1, ...` in order of first appearance.
///
/// Noise stays `-1`.
pub fn relabel_by_first_appearance(labels: &[ClusterId]) -> Vec<ClusterId> {
    let mut mapping: BTreeMap<ClusterId, ClusterId> = BTreeMap::new();
    let mut next = 0;
    labels
        .iter()
        .map(|label| {
            if *label == NOISE_CLUSTER_ID {
                return NOISE_CLUSTER_ID;
            }
            *mapping.entry(*label).or_insert_with(|| {
                let id = next;
                next += 1;
                id
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relabel_by_first_appearance() {
        assert_eq!(
            relabel_by_first_appearance(&[7, 7, -1, 3, 7, 9]),
            vec![0, 0, -1, 1, 0, 2]
        );
        assert!(relabel_by_first_appearance(&[]).is_empty());
    }
}
