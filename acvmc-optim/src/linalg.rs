//! Small dense linear algebra on row-major `Vec<Vec<F>>` matrices.
//!
//! The constrained solvers only ever factor KKT-sized systems (a handful of rows),
//! so plain partial-pivoted LU is sufficient.

use num_traits::Float;

/// Result of LU factorization with partial pivoting.
///
/// Stores the combined L/U factors in a single matrix (L below diagonal,
/// U on and above diagonal) plus the row permutation.
pub struct LuFactors<F> {
    lu: Vec<Vec<F>>,
    /// `perm[i]` is the original row index for factored row `i`.
    perm: Vec<usize>,
    n: usize,
}

/// Factorize an `n x n` matrix via LU decomposition with partial pivoting.
///
/// A pivot is treated as zero when it is below `1e-13` times the largest
/// absolute entry of `a`. Returns `None` in that case.
#[allow(clippy::needless_range_loop)]
pub fn lu_factor<F: Float>(a: &[Vec<F>]) -> Option<LuFactors<F>> {
    let n = a.len();
    debug_assert!(a.iter().all(|row| row.len() == n));

    let mut lu: Vec<Vec<F>> = a.to_vec();
    let mut perm: Vec<usize> = (0..n).collect();

    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(F::zero(), |m, &v| m.max(v.abs()));
    if !scale.is_finite() {
        return None;
    }
    let tiny = F::from(1e-13).unwrap_or_else(F::epsilon) * scale.max(F::min_positive_value());

    for col in 0..n {
        let mut max_val = lu[col][col].abs();
        let mut max_row = col;
        for row in (col + 1)..n {
            let v = lu[row][col].abs();
            if v > max_val {
                max_val = v;
                max_row = row;
            }
        }

        if max_val <= tiny {
            return None;
        }

        if max_row != col {
            lu.swap(col, max_row);
            perm.swap(col, max_row);
        }

        let pivot = lu[col][col];
        for row in (col + 1)..n {
            let factor = lu[row][col] / pivot;
            lu[row][col] = factor;
            for j in (col + 1)..n {
                let val = lu[col][j];
                lu[row][j] = lu[row][j] - factor * val;
            }
        }
    }

    Some(LuFactors { lu, perm, n })
}

/// Solve `A * x = b` using a pre-computed LU factorization.
#[allow(clippy::needless_range_loop)]
pub fn lu_back_solve<F: Float>(factors: &LuFactors<F>, b: &[F]) -> Vec<F> {
    let n = factors.n;
    debug_assert_eq!(b.len(), n);

    let mut y: Vec<F> = factors.perm.iter().map(|&p| b[p]).collect();

    // L has a unit diagonal.
    for i in 1..n {
        for j in 0..i {
            let l_ij = factors.lu[i][j];
            let y_j = y[j];
            y[i] = y[i] - l_ij * y_j;
        }
    }

    let mut x = vec![F::zero(); n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum = sum - factors.lu[i][j] * x[j];
        }
        x[i] = sum / factors.lu[i][i];
    }

    x
}

/// Solve `A * x = b` via LU factorization with partial pivoting.
///
/// Returns `None` if the matrix is numerically singular.
pub fn lu_solve<F: Float>(a: &[Vec<F>], b: &[F]) -> Option<Vec<F>> {
    let factors = lu_factor(a)?;
    Some(lu_back_solve(&factors, b))
}

/// `A * v`.
pub fn mat_vec<F: Float>(a: &[Vec<F>], v: &[F]) -> Vec<F> {
    a.iter().map(|row| crate::convergence::dot(row, v)).collect()
}

/// `Aᵀ * w` for an `m x n` matrix `A`; `n` is passed explicitly so that `m = 0` works.
pub fn mat_t_vec<F: Float>(a: &[Vec<F>], w: &[F], n: usize) -> Vec<F> {
    debug_assert_eq!(a.len(), w.len());
    let mut out = vec![F::zero(); n];
    for (row, &wi) in a.iter().zip(w) {
        for (o, &aij) in out.iter_mut().zip(row) {
            *o = *o + aij * wi;
        }
    }
    out
}

/// `A * Aᵀ` for an `m x n` matrix.
pub fn gram<F: Float>(a: &[Vec<F>]) -> Vec<Vec<F>> {
    let m = a.len();
    let mut g = vec![vec![F::zero(); m]; m];
    for i in 0..m {
        for j in i..m {
            let v = crate::convergence::dot(&a[i], &a[j]);
            g[i][j] = v;
            g[j][i] = v;
        }
    }
    g
}

/// The `n x n` identity matrix.
pub fn identity<F: Float>(n: usize) -> Vec<Vec<F>> {
    let mut m = vec![vec![F::zero(); n]; n];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = F::one();
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lu_solve_2x2() {
        // [2 1] [x0]   [5]
        // [1 3] [x1] = [7]
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let x = lu_solve(&a, &[5.0, 7.0]).unwrap();
        assert!((x[0] - 1.6).abs() < 1e-12);
        assert!((x[1] - 1.8).abs() < 1e-12);
    }

    #[test]
    fn lu_solve_singular() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(lu_solve(&a, &[3.0, 6.0]).is_none());
    }

    #[test]
    fn lu_solve_needs_pivoting() {
        let a = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let x = lu_solve(&a, &[3.0, 7.0]).unwrap();
        assert!((x[0] - 7.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn singularity_is_relative_to_scale() {
        // Well conditioned but tiny entries must still factor.
        let a = vec![vec![2e-9, 1e-9], vec![1e-9, 3e-9]];
        let x = lu_solve(&a, &[5e-9, 7e-9]).unwrap();
        assert!((x[0] - 1.6).abs() < 1e-9);
        assert!((x[1] - 1.8).abs() < 1e-9);
    }

    #[test]
    fn transpose_products() {
        let a = vec![vec![1.0, 2.0, 3.0], vec![0.0, 1.0, -1.0]];
        assert_eq!(mat_vec(&a, &[1.0, 1.0, 1.0]), vec![6.0, 0.0]);
        assert_eq!(mat_t_vec(&a, &[1.0, 2.0], 3), vec![1.0, 4.0, 1.0]);
        assert_eq!(mat_t_vec::<f64>(&[], &[], 2), vec![0.0, 0.0]);
        let g = gram(&a);
        assert_eq!(g, vec![vec![14.0, -1.0], vec![-1.0, 2.0]]);
    }
}
