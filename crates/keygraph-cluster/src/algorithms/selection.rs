//! Automatic choice of `k` for the partitioning algorithms.

use std::collections::BTreeSet;

use keygraph_core::{ClusterId, Result};
use ndarray::Array2;
use tracing::debug;

use crate::metrics::silhouette_score;

/// Candidate range `[2, min(max_clusters, n / 2)]`; empty when `n < 4`.
pub fn candidate_range(n: usize, max_clusters: usize) -> std::ops::RangeInclusive<usize> {
    2..=max_clusters.min(n / 2)
}

/// Sweep `k` and keep the labeling with the highest silhouette.
///
/// Ties keep the smaller `k`. Labelings with fewer than two clusters are
/// skipped. If nothing qualifies every point goes to cluster 0.
pub fn select_k<F>(distances: &Array2<f64>, max_clusters: usize, mut fit_k: F) -> Result<Vec<ClusterId>>
where
    F: FnMut(usize) -> Result<Vec<ClusterId>>,
{
    let n = distances.nrows();
    let mut best: Option<(f64, usize, Vec<ClusterId>)> = None;

    for k in candidate_range(n, max_clusters) {
        let labels = fit_k(k)?;
        let distinct: BTreeSet<ClusterId> = labels.iter().copied().collect();
        if distinct.len() < 2 {
            continue;
        }
        let score = silhouette_score(distances, &labels);
        debug!(k, silhouette = score, "Scored candidate k");
        if best.as_ref().map_or(true, |(s, _, _)| score > *s) {
            best = Some((score, k, labels));
        }
    }

    match best {
        Some((score, k, labels)) => {
            debug!(k, silhouette = score, "Selected k");
            Ok(labels)
        }
        None => Ok(vec![0; n]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_range() {
        assert!(candidate_range(3, 50).is_empty());
        assert_eq!(candidate_range(4, 50), 2..=2);
        assert_eq!(candidate_range(100, 5), 2..=5);
    }

    #[test]
    fn test_small_input_is_single_cluster() {
        let d = Array2::<f64>::zeros((3, 3));
        let labels = select_k(&d, 50, |_| unreachable!("no candidate k for n = 3")).unwrap();
        assert_eq!(labels, vec![0, 0, 0]);
    }

    #[test]
    fn test_picks_best_silhouette() {
        let points: [f64; 8] = [0.0, 0.1, 0.2, 10.0, 10.1, 10.2, 20.0, 20.1];
        let d = Array2::from_shape_fn((8, 8), |(i, j)| (points[i] - points[j]).abs());
        let labels = select_k(&d, 4, |k| {
            Ok(match k {
                2 => vec![0, 0, 0, 1, 1, 1, 1, 1],
                3 => vec![0, 0, 0, 1, 1, 1, 2, 2],
                _ => vec![0, 1, 0, 1, 2, 3, 2, 3],
            })
        })
        .unwrap();
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1, 2, 2]);
    }
}
