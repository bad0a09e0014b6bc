//! Spherical k-means with k-means++ seeding and automatic `k`.

use keygraph_core::{ClusterId, ClusteringConfig, ClusteringMethod, Result};
use keygraph_vector::{cosine_distance_matrix, normalize_rows};
use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

use super::selection::select_k;
use super::{relabel_by_first_appearance, ClusteringAlgorithm};

const MAX_ITERATIONS: usize = 300;
const TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Array2<f64>,
    pub inertia: f64,
    pub iterations: usize,
}

#[derive(Debug, Clone)]
pub struct KMeans {
    pub max_clusters: usize,
    pub restarts: usize,
    pub seed: u64,
}

impl KMeans {
    pub fn new(max_clusters: usize, restarts: usize, seed: u64) -> Self {
        Self {
            max_clusters,
            restarts: restarts.max(1),
            seed,
        }
    }

    pub fn from_config(config: &ClusteringConfig) -> Self {
        Self::new(config.max_clusters, config.kmeans_restarts, config.random_seed)
    }

    fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    /// Nearest centroid per row; ties go to the lowest centroid index.
    fn assign(data: &Array2<f64>, centroids: &Array2<f64>) -> Vec<(usize, f64)> {
        (0..data.nrows())
            .into_par_iter()
            .map(|i| {
                let row = data.row(i);
                let mut best = (0usize, f64::INFINITY);
                for (c, centroid) in centroids.outer_iter().enumerate() {
                    let d = Self::squared_distance(row, centroid);
                    if d < best.1 {
                        best = (c, d);
                    }
                }
                best
            })
            .collect()
    }

    fn seed_centroids(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
        let n = data.nrows();
        let mut chosen: Vec<usize> = Vec::with_capacity(k);
        chosen.push(rng.random_range(0..n));

        let mut nearest: Vec<f64> = (0..n)
            .map(|i| Self::squared_distance(data.row(i), data.row(chosen[0])))
            .collect();

        while chosen.len() < k {
            let total: f64 = nearest.iter().sum();
            let next = if total <= f64::EPSILON {
                // every point coincides with a centre; take the first unused one
                (0..n).find(|i| !chosen.contains(i)).unwrap_or(0)
            } else {
                let target = rng.random::<f64>() * total;
                let mut cumulative = 0.0;
                let mut pick = n - 1;
                for (i, d) in nearest.iter().enumerate() {
                    cumulative += d;
                    if cumulative > target && *d > 0.0 {
                        pick = i;
                        break;
                    }
                }
                pick
            };
            chosen.push(next);
            for (i, slot) in nearest.iter_mut().enumerate() {
                let d = Self::squared_distance(data.row(i), data.row(next));
                if d < *slot {
                    *slot = d;
                }
            }
        }

        let mut centroids = Array2::<f64>::zeros((k, data.ncols()));
        for (c, &i) in chosen.iter().enumerate() {
            centroids.row_mut(c).assign(&data.row(i));
        }
        centroids
    }

    /// One Lloyd run from k-means++ seeds.
    fn lloyd(data: &Array2<f64>, k: usize, rng: &mut StdRng) -> KMeansFit {
        let n = data.nrows();
        let dim = data.ncols();
        let mut centroids = Self::seed_centroids(data, k, rng);
        let mut assignment = Self::assign(data, &centroids);
        let mut iterations = 0;

        for iteration in 1..=MAX_ITERATIONS {
            iterations = iteration;
            let mut labels: Vec<usize> = assignment.iter().map(|(c, _)| *c).collect();

            // an empty cluster takes the point farthest from its own centroid
            for c in 0..k {
                if labels.iter().any(|l| *l == c) {
                    continue;
                }
                let mut farthest: Option<(usize, f64)> = None;
                for i in 0..n {
                    let members = labels.iter().filter(|l| **l == labels[i]).count();
                    if members < 2 {
                        continue;
                    }
                    let d = Self::squared_distance(data.row(i), centroids.row(labels[i]));
                    if farthest.map_or(true, |(_, best)| d > best) {
                        farthest = Some((i, d));
                    }
                }
                if let Some((i, _)) = farthest {
                    labels[i] = c;
                }
            }

            let mut updated = Array2::<f64>::zeros((k, dim));
            let mut counts = vec![0usize; k];
            for (i, &c) in labels.iter().enumerate() {
                let mut row = updated.row_mut(c);
                row += &data.row(i);
                counts[c] += 1;
            }
            for c in 0..k {
                if counts[c] > 0 {
                    updated.row_mut(c).mapv_inplace(|x| x / counts[c] as f64);
                } else {
                    updated.row_mut(c).assign(&centroids.row(c));
                }
            }

            let shift: f64 = (0..k)
                .map(|c| Self::squared_distance(updated.row(c), centroids.row(c)))
                .sum();
            centroids = updated;
            assignment = Self::assign(data, &centroids);
            if shift <= TOLERANCE {
                break;
            }
        }

        KMeansFit {
            labels: assignment.iter().map(|(c, _)| *c).collect(),
            inertia: assignment.iter().map(|(_, d)| d).sum(),
            centroids,
            iterations,
        }
    }

    /// Best of `restarts` runs for a fixed `k`, by inertia.
    pub fn fit_k(&self, data: &Array2<f64>, k: usize) -> KMeansFit {
        let k = k.clamp(1, data.nrows().max(1));
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(k as u64));
        let mut best: Option<KMeansFit> = None;
        for _ in 0..self.restarts {
            let fit = Self::lloyd(data, k, &mut rng);
            if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
                best = Some(fit);
            }
        }
        match best {
            Some(fit) => {
                debug!(k, inertia = fit.inertia, iterations = fit.iterations, "k-means fit");
                fit
            }
            None => Self::lloyd(data, k, &mut rng),
        }
    }
}

impl ClusteringAlgorithm for KMeans {
    fn method(&self) -> ClusteringMethod {
        ClusteringMethod::KMeans
    }

    fn fit(&self, embeddings: &Array2<f32>) -> Result<Vec<ClusterId>> {
        if embeddings.nrows() == 0 {
            return Ok(Vec::new());
        }
        let data = normalize_rows(embeddings.view()).mapv(f64::from);
        let distances = cosine_distance_matrix(embeddings.view());

        select_k(&distances, self.max_clusters, |k| {
            let fit = self.fit_k(&data, k);
            let labels: Vec<ClusterId> = fit.labels.iter().map(|l| *l as ClusterId).collect();
            Ok(relabel_by_first_appearance(&labels))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn blobs() -> Array2<f32> {
        array![
            [1.0f32, 0.05, 0.0],
            [0.98, 0.0, 0.05],
            [0.97, 0.04, 0.02],
            [0.0, 1.0, 0.03],
            [0.05, 0.99, 0.0],
            [0.02, 0.97, 0.05],
            [0.0, 0.02, 1.0],
            [0.04, 0.0, 0.98],
        ]
    }

    #[test]
    fn test_recovers_three_directions() {
        let kmeans = KMeans::new(50, 4, 42);
        let labels = kmeans.fit(&blobs()).unwrap();
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1, 2, 2]);
    }

    #[test]
    fn test_fit_k_is_seeded() {
        let data = normalize_rows(blobs().view()).mapv(f64::from);
        let kmeans = KMeans::new(50, 2, 7);
        let a = kmeans.fit_k(&data, 3);
        let b = kmeans.fit_k(&data, 3);
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.inertia, b.inertia);
        assert_eq!(a.centroids.dim(), (3, 3));
    }

    #[test]
    fn test_no_empty_clusters_with_duplicates() {
        let data = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
        let fit = KMeans::new(10, 1, 1).fit_k(&data, 3);
        let mut used = fit.labels.clone();
        used.sort_unstable();
        used.dedup();
        assert!(used.len() >= 2);
    }

    #[test]
    fn test_small_inputs_fall_back_to_one_cluster() {
        let data = array![[1.0f32, 0.0], [0.0, 1.0], [0.7, 0.7]];
        assert_eq!(KMeans::new(50, 4, 42).fit(&data).unwrap(), vec![0, 0, 0]);
    }
}
