use num_traits::Float;

use crate::convergence::axpy;

/// Parameters for the backtracking merit line search.
#[derive(Debug, Clone)]
pub struct MeritParams<F> {
    /// Sufficient decrease parameter (default: 1e-4).
    pub c: F,
    /// Backtracking factor (default: 0.5).
    pub rho: F,
    /// Minimum step size before declaring failure (default: 1e-10).
    pub alpha_min: F,
}

impl Default for MeritParams<f64> {
    fn default() -> Self {
        MeritParams {
            c: 1e-4,
            rho: 0.5,
            alpha_min: 1e-10,
        }
    }
}

impl Default for MeritParams<f32> {
    fn default() -> Self {
        MeritParams {
            c: 1e-4,
            rho: 0.5,
            alpha_min: 1e-6,
        }
    }
}

/// Accepted point of a merit line search.
#[derive(Debug)]
pub struct MeritStep<F, T> {
    pub alpha: F,
    pub x: Vec<F>,
    pub merit: F,
    /// Whatever the evaluation closure computed alongside the merit value.
    pub payload: T,
}

/// Backtracking line search on a merit function.
///
/// Searches for `alpha` such that `phi(x + alpha*d) <= phi0 + c * alpha * slope`, where
/// `slope` is the directional derivative of the merit function along `d` (clamped to be
/// non-positive). `eval` returns `None` when the trial point cannot be evaluated (for
/// example a non-finite objective), which counts as a rejected step.
///
/// Returns `None` if `alpha` falls below `alpha_min`.
pub fn backtracking_merit<F: Float, T>(
    x: &[F],
    d: &[F],
    phi0: F,
    slope: F,
    params: &MeritParams<F>,
    mut eval: impl FnMut(&[F]) -> Option<(F, T)>,
) -> Option<MeritStep<F, T>> {
    let slope = slope.min(F::zero());
    let mut alpha = F::one();

    loop {
        if alpha < params.alpha_min {
            return None;
        }

        let x_new = axpy(x, alpha, d);
        if let Some((phi, payload)) = eval(&x_new) {
            if phi.is_finite() && phi <= phi0 + params.c * alpha * slope {
                return Some(MeritStep {
                    alpha,
                    x: x_new,
                    merit: phi,
                    payload,
                });
            }
        }

        alpha = alpha * params.rho;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic(x: &[f64]) -> f64 {
        0.5 * (x[0] * x[0] + x[1] * x[1])
    }

    #[test]
    fn full_step_on_quadratic() {
        let x = [2.0, 3.0];
        let d = [-2.0, -3.0];
        let step = backtracking_merit(
            &x,
            &d,
            quadratic(&x),
            -13.0,
            &MeritParams::default(),
            |p| Some((quadratic(p), ())),
        )
        .unwrap();
        assert_eq!(step.alpha, 1.0);
        assert_eq!(step.merit, 0.0);
    }

    #[test]
    fn backtracks_past_unevaluable_points() {
        // Only points with x <= 1 can be evaluated.
        let step = backtracking_merit(
            &[0.0],
            &[4.0],
            0.0,
            -4.0,
            &MeritParams::default(),
            |p| (p[0] <= 1.0).then(|| (-p[0], p[0])),
        )
        .unwrap();
        assert_eq!(step.alpha, 0.25);
        assert_eq!(step.payload, 1.0);
    }

    #[test]
    fn ascent_direction_fails() {
        let x = [2.0, 3.0];
        let result = backtracking_merit(
            &x,
            &[2.0, 3.0],
            quadratic(&x),
            13.0,
            &MeritParams::default(),
            |p| Some((quadratic(p), ())),
        );
        assert!(result.is_none());
    }
}
