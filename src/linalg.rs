//! Dense LU solve over any [`Scalar`], so the control-variate systems can be
//! differentiated with respect to the sample ratios.

use num_traits::{Float as _, FromPrimitive};

use crate::scalar::Scalar;

/// Dot product of two equally long slices.
pub fn dot<T: Scalar>(a: &[T], b: &[T]) -> T {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).fold(T::zero(), |acc, (&x, &y)| acc + x * y)
}

/// Solve `A x = b` by LU decomposition with partial pivoting.
///
/// Pivots are chosen on the primal values. A pivot whose magnitude is below `1e-12`
/// times the largest entry of `A` is treated as zero and `None` is returned.
#[allow(clippy::needless_range_loop)]
pub fn lu_solve<T: Scalar>(a: &[Vec<T>], b: &[T]) -> Option<Vec<T>> {
    let n = a.len();
    debug_assert!(a.iter().all(|row| row.len() == n));
    debug_assert_eq!(b.len(), n);

    let scale = a
        .iter()
        .flatten()
        .fold(T::zero(), |m, v| m.max(v.abs()))
        .value();
    if !scale.is_finite() {
        return None;
    }
    let tiny = scale * T::Float::from_f64(1e-12)?;

    let mut lu: Vec<Vec<T>> = a.to_vec();
    let mut rhs: Vec<T> = b.to_vec();

    for col in 0..n {
        let mut max_row = col;
        let mut max_val = lu[col][col].value().abs();
        for row in (col + 1)..n {
            let v = lu[row][col].value().abs();
            if v > max_val {
                max_val = v;
                max_row = row;
            }
        }
        if max_val <= tiny {
            return None;
        }
        lu.swap(col, max_row);
        rhs.swap(col, max_row);

        let pivot = lu[col][col];
        for row in (col + 1)..n {
            let factor = lu[row][col] / pivot;
            for j in col..n {
                let v = lu[col][j];
                lu[row][j] -= factor * v;
            }
            let r = rhs[col];
            rhs[row] -= factor * r;
        }
    }

    let mut x = vec![T::zero(); n];
    for i in (0..n).rev() {
        let mut sum = rhs[i];
        for j in (i + 1)..n {
            sum -= lu[i][j] * x[j];
        }
        x[i] = sum / lu[i][i];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dual;

    #[test]
    fn solves_with_pivoting() {
        let a = vec![vec![0.0, 2.0], vec![1.0, 1.0]];
        let x = lu_solve(&a, &[4.0, 3.0]).unwrap();
        assert!(f64::abs(x[0] - 1.0) < 1e-14);
        assert!(f64::abs(x[1] - 2.0) < 1e-14);
    }

    #[test]
    fn singular_is_none() {
        let a = vec![vec![1.0, 2.0], vec![0.5, 1.0]];
        assert!(lu_solve(&a, &[1.0, 1.0]).is_none());
    }

    #[test]
    fn derivative_of_solution() {
        // x(t) = 1 / t for [t] x = [1]; dx/dt = -1 / t^2
        let t = Dual::variable(2.0_f64);
        let x = lu_solve(&[vec![t]], &[Dual::constant(1.0)]).unwrap();
        assert_eq!(x[0].re, 0.5);
        assert_eq!(x[0].eps, -0.25);
    }
}
