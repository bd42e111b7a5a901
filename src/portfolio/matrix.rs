//! Small dense linear-algebra routines for covariance matrices.
//!
//! Matrices are `n x n`, stored row-major in a flat `Vec<f64>`. The number of
//! traded securities is small, so plain Gauss-Jordan elimination is enough.

/// Invert a square matrix with Gauss-Jordan elimination and partial pivoting.
///
/// Returns `None` when a pivot falls below `tolerance` times the largest
/// absolute entry, i.e. the matrix is singular for practical purposes.
pub fn invert(a: &[f64], n: usize, tolerance: f64) -> Option<Vec<f64>> {
    if n == 0 || a.len() != n * n {
        return None;
    }
    let idx = |i: usize, j: usize| -> usize { i * n + j };

    let scale = a.iter().map(|v| v.abs()).fold(0.0_f64, f64::max);
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }
    let threshold = tolerance * scale;

    let mut m = a.to_vec();
    let mut inv = identity(n);

    for col in 0..n {
        // Partial pivot
        let pivot_row = (col..n)
            .max_by(|&r1, &r2| m[idx(r1, col)].abs().total_cmp(&m[idx(r2, col)].abs()))?;
        let pivot = m[idx(pivot_row, col)];
        if pivot.abs() <= threshold {
            return None;
        }

        if pivot_row != col {
            for k in 0..n {
                m.swap(idx(col, k), idx(pivot_row, k));
                inv.swap(idx(col, k), idx(pivot_row, k));
            }
        }

        for k in 0..n {
            m[idx(col, k)] /= pivot;
            inv[idx(col, k)] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = m[idx(row, col)];
            if factor == 0.0 {
                continue;
            }
            for k in 0..n {
                let dm = factor * m[idx(col, k)];
                let di = factor * inv[idx(col, k)];
                m[idx(row, k)] -= dm;
                inv[idx(row, k)] -= di;
            }
        }
    }

    inv.iter().all(|v| v.is_finite()).then_some(inv)
}

/// Identity matrix.
pub fn identity(n: usize) -> Vec<f64> {
    let mut m = vec![0.0; n * n];
    for i in 0..n {
        m[i * n + i] = 1.0;
    }
    m
}

/// Matrix-vector product `A x`.
pub fn mat_vec(a: &[f64], n: usize, x: &[f64]) -> Vec<f64> {
    (0..n)
        .map(|i| (0..n).map(|j| a[i * n + j] * x[j]).sum())
        .collect()
}

/// Dot product.
pub fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

/// Quadratic form `xᵀ A x`.
pub fn quadratic_form(a: &[f64], n: usize, x: &[f64]) -> f64 {
    dot(x, &mat_vec(a, n, x))
}

/// Extract the sub-matrix on the given row/column indices.
pub fn submatrix(a: &[f64], n: usize, keep: &[usize]) -> Vec<f64> {
    let mut out = Vec::with_capacity(keep.len() * keep.len());
    for &i in keep {
        for &j in keep {
            out.push(a[i * n + j]);
        }
    }
    out
}

/// Diagonal matrix built from the diagonal of `a`.
pub fn diagonal_of(a: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n * n];
    for i in 0..n {
        out[i * n + i] = a[i * n + i];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f64], b: &[f64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-9, "{} != {}", x, y);
        }
    }

    #[test]
    fn test_invert_two_by_two() {
        let a = vec![4.0, 1.0, 1.0, 3.0];
        let inv = invert(&a, 2, 1e-12).unwrap();
        // det = 11
        assert_close(&inv, &[3.0 / 11.0, -1.0 / 11.0, -1.0 / 11.0, 4.0 / 11.0]);
    }

    #[test]
    fn test_invert_requires_pivoting() {
        let a = vec![0.0, 2.0, 3.0, 0.0];
        let inv = invert(&a, 2, 1e-12).unwrap();
        assert_close(&inv, &[0.0, 1.0 / 3.0, 0.5, 0.0]);
    }

    #[test]
    fn test_singular_matrix_detected() {
        // Second row is twice the first
        let a = vec![1.0, 2.0, 2.0, 4.0];
        assert!(invert(&a, 2, 1e-10).is_none());
    }

    #[test]
    fn test_product_with_inverse_is_identity() {
        let a = vec![2.0, 0.5, 0.1, 0.5, 1.5, 0.2, 0.1, 0.2, 1.0];
        let inv = invert(&a, 3, 1e-12).unwrap();
        let mut product = vec![0.0; 9];
        for i in 0..3 {
            for j in 0..3 {
                product[i * 3 + j] = (0..3).map(|k| a[i * 3 + k] * inv[k * 3 + j]).sum();
            }
        }
        assert_close(&product, &identity(3));
    }

    #[test]
    fn test_submatrix_and_diagonal() {
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        assert_eq!(submatrix(&a, 3, &[0, 2]), vec![1.0, 3.0, 7.0, 9.0]);
        assert_eq!(
            diagonal_of(&a, 3),
            vec![1.0, 0.0, 0.0, 0.0, 5.0, 0.0, 0.0, 0.0, 9.0]
        );
        assert_eq!(quadratic_form(&identity(2), 2, &[3.0, 4.0]), 25.0);
    }
}
