use num_traits::Float;

/// Parameters controlling convergence checks.
#[derive(Debug, Clone)]
pub struct ConvergenceParams<F> {
    /// Maximum number of iterations (default: 500).
    pub max_iter: usize,
    /// Stationarity tolerance on the Lagrangian gradient, infinity norm (default: 1e-8).
    pub grad_tol: F,
    /// Step size tolerance: stop when `||x_{k+1} - x_k||_inf < step_tol` (default: 1e-12).
    pub step_tol: F,
    /// Function change tolerance: stop when `|f_{k+1} - f_k| < func_tol` (default: 1e-12).
    pub func_tol: F,
    /// Feasibility tolerance on the constraint violation (default: 1e-9).
    pub constraint_tol: F,
}

impl Default for ConvergenceParams<f64> {
    fn default() -> Self {
        ConvergenceParams {
            max_iter: 500,
            grad_tol: 1e-8,
            step_tol: 1e-12,
            func_tol: 1e-12,
            constraint_tol: 1e-9,
        }
    }
}

impl Default for ConvergenceParams<f32> {
    fn default() -> Self {
        ConvergenceParams {
            max_iter: 500,
            grad_tol: 1e-5,
            step_tol: 1e-7,
            func_tol: 1e-7,
            constraint_tol: 1e-5,
        }
    }
}

/// Compute the L2 norm of a vector.
pub fn norm<F: Float>(v: &[F]) -> F {
    let mut s = F::zero();
    for &x in v {
        s = s + x * x;
    }
    s.sqrt()
}

/// Compute the infinity norm of a vector (zero for an empty vector).
pub fn norm_inf<F: Float>(v: &[F]) -> F {
    v.iter().fold(F::zero(), |m, &x| m.max(x.abs()))
}

/// Compute the L1 norm of a vector.
pub fn norm_1<F: Float>(v: &[F]) -> F {
    v.iter().fold(F::zero(), |s, &x| s + x.abs())
}

/// Compute the dot product of two vectors.
pub fn dot<F: Float>(a: &[F], b: &[F]) -> F {
    debug_assert_eq!(a.len(), b.len());
    let mut s = F::zero();
    for i in 0..a.len() {
        s = s + a[i] * b[i];
    }
    s
}

/// `x + alpha * d`.
pub fn axpy<F: Float>(x: &[F], alpha: F, d: &[F]) -> Vec<F> {
    debug_assert_eq!(x.len(), d.len());
    x.iter().zip(d).map(|(&xi, &di)| xi + alpha * di).collect()
}
