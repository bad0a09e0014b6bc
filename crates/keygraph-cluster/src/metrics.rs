//! Partition metrics shared by automatic-k selection and validation.

use std::collections::{BTreeMap, BTreeSet};

use keygraph_core::{ClusterId, NOISE_CLUSTER_ID};
use keygraph_vector::vector_ops::{mean_vector, squared_euclidean};
use ndarray::{Array2, ArrayView2};

/// Mean silhouette over non-noise points, using a precomputed distance matrix.
///
/// Returns 0 when fewer than two non-noise clusters exist. Points in
/// single-member clusters contribute 0.
pub fn silhouette_score(distances: &Array2<f64>, labels: &[ClusterId]) -> f64 {
    let n = labels.len();
    if n < 2 || distances.nrows() != n {
        return 0.0;
    }

    let clusters: BTreeSet<ClusterId> = labels
        .iter()
        .copied()
        .filter(|l| *l != NOISE_CLUSTER_ID)
        .collect();
    if clusters.len() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut count = 0usize;

    for i in 0..n {
        if labels[i] == NOISE_CLUSTER_ID {
            continue;
        }
        count += 1;

        // a(i) = mean distance to same cluster, b(i) = min mean distance to another
        let mut sums: BTreeMap<ClusterId, (f64, usize)> = BTreeMap::new();
        for j in 0..n {
            if j == i || labels[j] == NOISE_CLUSTER_ID {
                continue;
            }
            let entry = sums.entry(labels[j]).or_insert((0.0, 0));
            entry.0 += distances[[i, j]];
            entry.1 += 1;
        }

        let Some(&(own_sum, own_count)) = sums.get(&labels[i]) else {
            continue;
        };
        if own_count == 0 {
            continue;
        }
        let a = own_sum / own_count as f64;
        let b = sums
            .iter()
            .filter(|(label, (_, c))| **label != labels[i] && *c > 0)
            .map(|(_, (sum, c))| sum / *c as f64)
            .fold(f64::INFINITY, f64::min);
        if !b.is_finite() {
            continue;
        }

        let max_ab = a.max(b);
        if max_ab > 0.0 {
            total += (b - a) / max_ab;
        }
    }

    if count > 0 {
        total / count as f64
    } else {
        0.0
    }
}

/// Row indices per cluster, noise included.
pub fn members_by_cluster(labels: &[ClusterId]) -> BTreeMap<ClusterId, Vec<usize>> {
    let mut members: BTreeMap<ClusterId, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        members.entry(*label).or_default().push(i);
    }
    members
}

/// Sum of squared Euclidean distances to each non-noise cluster centroid.
pub fn inertia(embeddings: ArrayView2<'_, f32>, labels: &[ClusterId]) -> f64 {
    let mut total = 0.0;
    for (label, rows) in members_by_cluster(labels) {
        if label == NOISE_CLUSTER_ID {
            continue;
        }
        let Some(centroid) = mean_vector(embeddings, &rows) else {
            continue;
        };
        let centroid: Vec<f32> = centroid.iter().map(|c| *c as f32).collect();
        for r in rows {
            let row = embeddings.row(r).to_vec();
            total += squared_euclidean(&row, &centroid);
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn line_distances(points: &[f64]) -> Array2<f64> {
        let n = points.len();
        Array2::from_shape_fn((n, n), |(i, j)| (points[i] - points[j]).abs())
    }

    #[test]
    fn test_silhouette_well_separated() {
        let d = line_distances(&[0.0, 0.1, 10.0, 10.1]);
        let score = silhouette_score(&d, &[0, 0, 1, 1]);
        assert!(score > 0.95);
    }

    #[test]
    fn test_silhouette_needs_two_clusters() {
        let d = line_distances(&[0.0, 1.0, 2.0]);
        assert_eq!(silhouette_score(&d, &[0, 0, 0]), 0.0);
        assert_eq!(silhouette_score(&d, &[0, -1, -1]), 0.0);
    }

    #[test]
    fn test_silhouette_ignores_noise_and_zeroes_singletons() {
        let d = line_distances(&[0.0, 0.0, 5.0, 100.0]);
        // point 2 is a singleton and scores 0; points 0,1 have a = 0 -> 1
        let score = silhouette_score(&d, &[0, 0, 1, -1]);
        assert_relative_eq!(score, 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inertia() {
        let e = array![[0.0f32, 0.0], [2.0, 0.0], [5.0, 5.0], [9.0, 9.0]];
        // cluster 0 centroid (1, 0): 1 + 1; singleton: 0; noise ignored
        assert_relative_eq!(inertia(e.view(), &[0, 0, 1, -1]), 2.0, epsilon = 1e-9);
    }
}
