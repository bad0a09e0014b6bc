//! Deterministic truncated SVD for small dense matrices.
//!
//! The reduction works on the `n x n` Gram matrix `X Xᵀ` and diagonalises it
//! with the cyclic Jacobi method, so the cost is cubic in the number of rows
//! and independent of the vocabulary size. Projected coordinates are
//! `U_k Σ_k`, which equals `X V_k` without ever forming `V`.

use ndarray::Array2;

use crate::error::VectorError;

const MAX_SWEEPS: usize = 100;

/// Eigen-decomposition of a symmetric matrix.
///
/// Returns eigenvalues sorted descending (ties keep their original column
/// order) and the matching eigenvectors as columns.
pub fn symmetric_eigen(matrix: &Array2<f64>) -> Result<(Vec<f64>, Array2<f64>), VectorError> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(VectorError::DimensionMismatch(n, matrix.ncols()));
    }

    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);
    let scale: f64 = a.iter().map(|x| x * x).sum::<f64>().max(f64::MIN_POSITIVE);

    for _ in 0..MAX_SWEEPS {
        let mut off = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[[p, q]] * a[[p, q]];
            }
        }
        if off <= 1e-24 * scale {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    if a.iter().any(|x| !x.is_finite()) {
        return Err(VectorError::Decomposition(
            "non-finite value during Jacobi rotation".to_string(),
        ));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        a[[j, j]]
            .partial_cmp(&a[[i, i]])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(i.cmp(&j))
    });

    let values: Vec<f64> = order.iter().map(|&i| a[[i, i]]).collect();
    let mut vectors = Array2::<f64>::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        vectors.column_mut(dst).assign(&v.column(src));
    }
    Ok((values, vectors))
}

/// Project the rows of `x` onto its top `components` right singular vectors.
///
/// Column signs are fixed so the largest-magnitude entry of every left
/// singular vector is positive, making the output independent of rotation
/// order.
pub fn truncated_svd(x: &Array2<f64>, components: usize) -> Result<Array2<f32>, VectorError> {
    let n = x.nrows();
    let k = components.min(n);
    if n == 0 || k == 0 {
        return Ok(Array2::zeros((n, k)));
    }

    let gram = x.dot(&x.t());
    let (values, vectors) = symmetric_eigen(&gram)?;

    let mut out = Array2::<f32>::zeros((n, k));
    for c in 0..k {
        let sigma = values[c].max(0.0).sqrt();
        let column = vectors.column(c);
        let pivot = column
            .iter()
            .copied()
            .fold(0.0f64, |best, x| if x.abs() > best.abs() { x } else { best });
        let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
        for r in 0..n {
            out[[r, c]] = (sign * column[r] * sigma) as f32;
        }
    }
    Ok(out)
}
