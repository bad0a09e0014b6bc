//! Dense vector math shared by every clustering stage.
//!
//! Similarities are accumulated in `f64` and stored as `f32`. Row-parallel
//! helpers only split work by row, so results are identical regardless of
//! the rayon thread count.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;

use crate::error::VectorError;

pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| *x as f64 * *y as f64)
        .sum()
}

pub fn norm(a: &[f32]) -> f64 {
    dot(a, a).sqrt()
}

/// Cosine similarity in `[-1, 1]`; zero when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, VectorError> {
    if a.len() != b.len() {
        return Err(VectorError::DimensionMismatch(a.len(), b.len()));
    }
    let denom = norm(a) * norm(b);
    if denom <= f64::EPSILON {
        return Ok(0.0);
    }
    Ok((dot(a, b) / denom).clamp(-1.0, 1.0) as f32)
}

pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as f64 - *y as f64;
            d * d
        })
        .sum()
}

/// Normalise in place; zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let n = norm(v);
    if n > f64::EPSILON {
        for x in v.iter_mut() {
            *x = (*x as f64 / n) as f32;
        }
    }
}

/// Row-normalised copy of an embedding matrix.
pub fn normalize_rows(embeddings: ArrayView2<'_, f32>) -> Array2<f32> {
    let mut out = embeddings.to_owned();
    for mut row in out.axis_iter_mut(Axis(0)) {
        if let Some(slice) = row.as_slice_mut() {
            l2_normalize(slice);
        } else {
            let mut owned = row.to_vec();
            l2_normalize(&mut owned);
            row.assign(&ArrayView1::from(owned.as_slice()));
        }
    }
    out
}

/// Arithmetic mean of the given rows; `None` for an empty selection.
pub fn mean_vector(embeddings: ArrayView2<'_, f32>, rows: &[usize]) -> Option<Vec<f64>> {
    if rows.is_empty() {
        return None;
    }
    let dim = embeddings.ncols();
    let mut centroid = vec![0.0f64; dim];
    for &r in rows {
        for (c, v) in centroid.iter_mut().zip(embeddings.row(r).iter()) {
            *c += *v as f64;
        }
    }
    let count = rows.len() as f64;
    centroid.iter_mut().for_each(|c| *c /= count);
    Some(centroid)
}

/// Full pairwise cosine-similarity matrix of the rows of `embeddings`.
pub fn cosine_similarity_matrix(embeddings: ArrayView2<'_, f32>) -> Array2<f32> {
    let n = embeddings.nrows();
    let normalized = normalize_rows(embeddings);
    let rows: Vec<Vec<f32>> = normalized.outer_iter().map(|r| r.to_vec()).collect();
    let norms: Vec<bool> = rows.iter().map(|r| norm(r) > f64::EPSILON).collect();

    let data: Vec<f32> = (0..n)
        .into_par_iter()
        .flat_map_iter(|i| {
            let rows = &rows;
            let norms = &norms;
            (0..n).map(move |j| {
                if !norms[i] || !norms[j] {
                    0.0
                } else if i == j {
                    1.0
                } else {
                    dot(&rows[i], &rows[j]).clamp(-1.0, 1.0) as f32
                }
            })
        })
        .collect();

    Array2::from_shape_vec((n, n), data).unwrap_or_else(|_| Array2::zeros((n, n)))
}

/// Pairwise cosine distance (`1 - similarity`) in `f64`, used by the clustering algorithms.
pub fn cosine_distance_matrix(embeddings: ArrayView2<'_, f32>) -> Array2<f64> {
    let sims = cosine_similarity_matrix(embeddings);
    let n = sims.nrows();
    let mut dist = sims.mapv(|s| (1.0 - s as f64).max(0.0));
    for i in 0..n {
        dist[[i, i]] = 0.0;
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_cosine_similarity_basic() {
        assert_relative_eq!(
            cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap(),
            1.0,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            cosine_similarity(&[1.0, 0.0], &[0.0, 2.0]).unwrap(),
            0.0,
            epsilon = 1e-6
        );
        assert_relative_eq!(
            cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]).unwrap(),
            -1.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_cosine_similarity_zero_and_mismatch() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).unwrap(), 0.0);
        assert!(matches!(
            cosine_similarity(&[1.0], &[1.0, 0.0]),
            Err(VectorError::DimensionMismatch(1, 2))
        ));
    }

    #[test]
    fn test_similarity_matrix_is_symmetric() {
        let m = array![[1.0f32, 0.0, 0.0], [0.6, 0.8, 0.0], [0.0, 0.0, 0.0]];
        let sims = cosine_similarity_matrix(m.view());
        assert_relative_eq!(sims[[0, 0]], 1.0);
        assert_relative_eq!(sims[[0, 1]], 0.6, epsilon = 1e-6);
        assert_relative_eq!(sims[[1, 0]], sims[[0, 1]]);
        // zero row never looks similar to anything, itself included
        assert_eq!(sims[[2, 2]], 0.0);
        assert_eq!(sims[[0, 2]], 0.0);

        let dist = cosine_distance_matrix(m.view());
        assert_relative_eq!(dist[[0, 1]], 0.4, epsilon = 1e-6);
        assert_eq!(dist[[2, 2]], 0.0);
    }

    #[test]
    fn test_mean_and_normalize() {
        let m = array![[3.0f32, 4.0], [1.0, 0.0]];
        let normalized = normalize_rows(m.view());
        assert_relative_eq!(normalized[[0, 0]], 0.6, epsilon = 1e-6);
        assert_relative_eq!(normalized[[0, 1]], 0.8, epsilon = 1e-6);

        let mean = mean_vector(m.view(), &[0, 1]).unwrap();
        assert_relative_eq!(mean[0], 2.0);
        assert_relative_eq!(mean[1], 2.0);
        assert!(mean_vector(m.view(), &[]).is_none());
    }
}
