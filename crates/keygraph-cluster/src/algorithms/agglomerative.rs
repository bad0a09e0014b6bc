//! Ward-linkage agglomerative clustering with automatic `k`.

use keygraph_core::{ClusterId, ClusteringConfig, ClusteringMethod, Result};
use keygraph_vector::vector_ops::squared_euclidean;
use keygraph_vector::{cosine_distance_matrix, normalize_rows};
use ndarray::Array2;

use super::selection::select_k;
use super::{relabel_by_first_appearance, ClusteringAlgorithm};

/// One step of the merge sequence: clusters represented by `keep` and
/// `absorbed` joined at `distance`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub keep: usize,
    pub absorbed: usize,
    pub distance: f64,
}

#[derive(Debug, Clone)]
pub struct Agglomerative {
    pub max_clusters: usize,
}

impl Agglomerative {
    pub fn new(max_clusters: usize) -> Self {
        Self { max_clusters }
    }

    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self::new(config.max_clusters)
    }

    /// Full Ward merge sequence via Lance-Williams updates on squared
    /// Euclidean distance. The closest pair is merged first; ties go to the
    /// lowest `(i, j)`.
    pub fn merge_sequence(embeddings: &Array2<f32>) -> Vec<Merge> {
        let n = embeddings.nrows();
        if n < 2 {
            return Vec::new();
        }
        let rows: Vec<Vec<f32>> = embeddings.outer_iter().map(|r| r.to_vec()).collect();

        let mut d = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let v = squared_euclidean(&rows[i], &rows[j]);
                d[[i, j]] = v;
                d[[j, i]] = v;
            }
        }

        let mut size = vec![1usize; n];
        let mut active = vec![true; n];
        let mut merges = Vec::with_capacity(n - 1);

        for _ in 1..n {
            let mut best: Option<(usize, usize, f64)> = None;
            for i in (0..n).filter(|&i| active[i]) {
                for j in ((i + 1)..n).filter(|&j| active[j]) {
                    if best.map_or(true, |(_, _, b)| d[[i, j]] < b) {
                        best = Some((i, j, d[[i, j]]));
                    }
                }
            }
            let Some((i, j, dij)) = best else {
                break;
            };

            let (ni, nj) = (size[i] as f64, size[j] as f64);
            for k in (0..n).filter(|&k| active[k] && k != i && k != j) {
                let nk = size[k] as f64;
                let updated =
                    ((ni + nk) * d[[k, i]] + (nj + nk) * d[[k, j]] - nk * dij) / (ni + nj + nk);
                d[[i, k]] = updated;
                d[[k, i]] = updated;
            }
            size[i] += size[j];
            active[j] = false;
            merges.push(Merge {
                keep: i,
                absorbed: j,
                distance: dij,
            });
        }
        merges
    }

    /// Labels after replaying merges until `k` clusters remain.
    pub fn cut(n: usize, merges: &[Merge], k: usize) -> Vec<ClusterId> {
        let mut owner: Vec<usize> = (0..n).collect();
        let steps = n.saturating_sub(k.max(1)).min(merges.len());
        for merge in &merges[..steps] {
            for o in owner.iter_mut() {
                if *o == merge.absorbed {
                    *o = merge.keep;
                }
            }
        }
        let labels: Vec<ClusterId> = owner.iter().map(|o| *o as ClusterId).collect();
        relabel_by_first_appearance(&labels)
    }
}

impl ClusteringAlgorithm for Agglomerative {
    fn method(&self) -> ClusteringMethod {
        ClusteringMethod::Agglomerative
    }

    fn fit(&self, embeddings: &Array2<f32>) -> Result<Vec<ClusterId>> {
        let n = embeddings.nrows();
        if n == 0 {
            return Ok(Vec::new());
        }
        let normalized = normalize_rows(embeddings.view());
        let merges = Self::merge_sequence(&normalized);
        let distances = cosine_distance_matrix(embeddings.view());
        select_k(&distances, self.max_clusters, |k| Ok(Self::cut(n, &merges, k)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_merge_order_and_ward_update() {
        // points on a line: 0, 1, 5
        let e = array![[0.0f32], [1.0], [5.0]];
        let merges = Agglomerative::merge_sequence(&e);
        assert_eq!(merges.len(), 2);
        assert_eq!((merges[0].keep, merges[0].absorbed), (0, 1));
        assert_relative_eq!(merges[0].distance, 1.0);
        // Lance-Williams: ((1+1)*25 + (1+1)*16 - 1*1) / 3
        assert_relative_eq!(merges[1].distance, 81.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cut_levels() {
        let e = array![[0.0f32], [1.0], [5.0], [6.0]];
        let merges = Agglomerative::merge_sequence(&e);
        assert_eq!(Agglomerative::cut(4, &merges, 4), vec![0, 1, 2, 3]);
        assert_eq!(Agglomerative::cut(4, &merges, 2), vec![0, 0, 1, 1]);
        assert_eq!(Agglomerative::cut(4, &merges, 1), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_fit_separates_directions() {
        let e = array![
            [1.0f32, 0.0],
            [0.95, 0.05],
            [0.0, 1.0],
            [0.05, 0.95],
        ];
        let labels = Agglomerative::new(50).fit(&e).unwrap();
        assert_eq!(labels, vec![0, 0, 1, 1]);
    }
}
