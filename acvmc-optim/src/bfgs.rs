use num_traits::Float;

use crate::convergence::dot;
use crate::linalg::{identity, mat_vec};

/// Dense quasi-Newton approximation of the Lagrangian Hessian.
///
/// Uses Powell's damped BFGS update so the matrix stays positive definite
/// even when the curvature condition `sᵀy > 0` fails, which is common for
/// constrained problems.
#[derive(Debug, Clone)]
pub struct Bfgs<F> {
    b: Vec<Vec<F>>,
    scaled: bool,
}

impl<F: Float> Bfgs<F> {
    /// Start from the identity.
    pub fn new(n: usize) -> Self {
        Bfgs {
            b: identity(n),
            scaled: false,
        }
    }

    /// Current Hessian approximation.
    pub fn matrix(&self) -> &[Vec<F>] {
        &self.b
    }

    /// Drop the accumulated curvature and restart from `γ I`, where `γ` is the mean
    /// diagonal of the current approximation.
    pub fn reset(&mut self) {
        let n = self.b.len();
        if n == 0 {
            return;
        }
        let trace = (0..n).fold(F::zero(), |acc, i| acc + self.b[i][i]);
        let mean = trace / F::from(n).unwrap_or_else(F::one);
        let gamma = if mean.is_finite() && mean > F::zero() {
            mean
        } else {
            F::one()
        };
        self.b = identity(n);
        for (i, row) in self.b.iter_mut().enumerate() {
            row[i] = gamma;
        }
    }

    /// `B * v`.
    pub fn apply(&self, v: &[F]) -> Vec<F> {
        mat_vec(&self.b, v)
    }

    /// Update with step `s = x_{k+1} - x_k` and gradient change `y`.
    ///
    /// Returns `false` if the pair was skipped.
    pub fn update(&mut self, s: &[F], y: &[F]) -> bool {
        let n = s.len();
        let ss = dot(s, s);
        if ss <= F::epsilon() * F::epsilon() {
            return false;
        }

        let sy = dot(s, y);
        let yy = dot(y, y);

        // Shanno-Phua scaling of the initial identity on the first good pair.
        if !self.scaled && sy > F::zero() && yy > F::zero() {
            let gamma = yy / sy;
            for (i, row) in self.b.iter_mut().enumerate() {
                row[i] = gamma;
            }
            self.scaled = true;
        }

        let bs = self.apply(s);
        let sbs = dot(s, &bs);
        if sbs <= F::zero() || !sbs.is_finite() {
            return false;
        }

        let point_two = F::from(0.2).unwrap_or_else(F::zero);
        let theta = if sy >= point_two * sbs {
            F::one()
        } else {
            (F::one() - point_two) * sbs / (sbs - sy)
        };
        let r: Vec<F> = y
            .iter()
            .zip(&bs)
            .map(|(&yi, &bsi)| theta * yi + (F::one() - theta) * bsi)
            .collect();
        let sr = dot(s, &r);
        if sr <= F::zero() || !sr.is_finite() {
            return false;
        }

        for i in 0..n {
            for j in 0..n {
                self.b[i][j] = self.b[i][j] - bs[i] * bs[j] / sbs + r[i] * r[j] / sr;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secant_condition_holds_after_update() {
        let mut b = Bfgs::new(2);
        let s = [1.0, 0.5];
        let y = [2.0, 1.5];
        assert!(b.update(&s, &y));
        let bs = b.apply(&s);
        assert!((bs[0] - y[0]).abs() < 1e-12);
        assert!((bs[1] - y[1]).abs() < 1e-12);
    }

    #[test]
    fn negative_curvature_is_damped() {
        let mut b = Bfgs::new(2);
        assert!(b.update(&[1.0, 0.0], &[-1.0, 0.0]));
        // Still positive definite: both leading minors positive.
        let m = b.matrix();
        assert!(m[0][0] > 0.0);
        assert!(m[0][0] * m[1][1] - m[0][1] * m[1][0] > 0.0);
    }

    #[test]
    fn reset_keeps_scale_and_drops_coupling() {
        let mut b = Bfgs::new(2);
        assert!(b.update(&[1.0, 0.5], &[2.0, 1.5]));
        let trace = b.matrix()[0][0] + b.matrix()[1][1];
        b.reset();
        let m = b.matrix();
        assert_eq!(m[0][1], 0.0);
        assert_eq!(m[1][0], 0.0);
        assert_eq!(m[0][0], m[1][1]);
        assert!((m[0][0] - trace / 2.0).abs() < 1e-12);
    }

    #[test]
    fn zero_step_is_skipped() {
        let mut b = Bfgs::<f64>::new(3);
        assert!(!b.update(&[0.0, 0.0, 0.0], &[1.0, 1.0, 1.0]));
    }
}
