//! Strictly convex quadratic programs with equality and inequality constraints.
//!
//! ```text
//! min  ½ dᵀ B d + gᵀ d
//! s.t. A d  = b        (equalities)
//!      G d >= h        (inequalities)
//! ```
//!
//! `B` must be symmetric positive definite. The problem is solved through its dual,
//!
//! ```text
//! min  ½ zᵀ M z − zᵀ q      z = (λ, μ),  μ >= 0
//! M = C B⁻¹ Cᵀ,  q = (b, h) + C B⁻¹ g,  C = [A; G]
//! ```
//!
//! which only has sign constraints and always has a feasible start `z = 0`. The primal
//! step is recovered as `d = B⁻¹ (Cᵀ z − g)`.

use num_traits::Float;

use crate::convergence::{dot, norm_inf};
use crate::linalg::{lu_back_solve, lu_factor, lu_solve, mat_vec};

/// Solution of a [`solve_qp`] call.
#[derive(Debug, Clone)]
pub struct QpSolution<F> {
    pub d: Vec<F>,
    /// Multipliers of `A d = b`.
    pub eq_multipliers: Vec<F>,
    /// Non-negative multipliers of `G d >= h`.
    pub ineq_multipliers: Vec<F>,
}

/// Solve the QP described in the module docs.
///
/// Returns `None` if `B` is singular, the active-set iteration does not settle, or the
/// recovered primal point violates the constraints (an infeasible QP has an unbounded
/// dual).
#[allow(clippy::too_many_arguments)]
pub fn solve_qp<F: Float>(
    b_mat: &[Vec<F>],
    g: &[F],
    a: &[Vec<F>],
    b: &[F],
    gi: &[Vec<F>],
    h: &[F],
    feas_tol: F,
) -> Option<QpSolution<F>> {
    let n = g.len();
    let me = a.len();
    let mi = gi.len();
    let p = me + mi;

    let factors = lu_factor(b_mat)?;
    let u = lu_back_solve(&factors, g);

    if p == 0 {
        return Some(QpSolution {
            d: u.into_iter().map(|v| F::zero() - v).collect(),
            eq_multipliers: Vec::new(),
            ineq_multipliers: Vec::new(),
        });
    }

    let c_rows: Vec<&Vec<F>> = a.iter().chain(gi.iter()).collect();
    let rhs: Vec<F> = b.iter().chain(h.iter()).copied().collect();

    // y[k] = B⁻¹ C[k]ᵀ
    let y: Vec<Vec<F>> = c_rows
        .iter()
        .map(|row| lu_back_solve(&factors, row))
        .collect();
    let mut m = vec![vec![F::zero(); p]; p];
    for i in 0..p {
        for j in i..p {
            let v = dot(c_rows[i], &y[j]);
            m[i][j] = v;
            m[j][i] = v;
        }
    }
    let q: Vec<F> = (0..p).map(|k| rhs[k] + dot(c_rows[k], &u)).collect();

    let z = bound_constrained_qp(&m, &q, me)?;

    let mut d: Vec<F> = u.iter().map(|&v| F::zero() - v).collect();
    for (zk, yk) in z.iter().zip(&y) {
        for (di, &yi) in d.iter_mut().zip(yk) {
            *di = *di + *zk * yi;
        }
    }
    if d.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let scale = F::one() + norm_inf(&rhs);
    let tol = feas_tol * scale;
    let eq_res = mat_vec(a, &d)
        .into_iter()
        .zip(b)
        .fold(F::zero(), |m, (ad, &bi)| m.max((ad - bi).abs()));
    let ineq_res = mat_vec(gi, &d)
        .into_iter()
        .zip(h)
        .fold(F::zero(), |m, (gd, &hi)| m.max(hi - gd));
    if eq_res > tol || ineq_res > tol {
        return None;
    }

    debug_assert_eq!(d.len(), n);
    Some(QpSolution {
        d,
        eq_multipliers: z[..me].to_vec(),
        ineq_multipliers: z[me..].to_vec(),
    })
}

/// Minimize `½ zᵀ M z − zᵀ q` subject to `z[k] >= 0` for `k >= n_free`.
///
/// Primal active-set iteration over the sign constraints, starting from `z = 0` with
/// every bounded variable held at its bound.
#[allow(clippy::needless_range_loop)]
fn bound_constrained_qp<F: Float>(m: &[Vec<F>], q: &[F], n_free: usize) -> Option<Vec<F>> {
    let p = q.len();
    let mut z = vec![F::zero(); p];
    let mut at_bound: Vec<bool> = (0..p).map(|k| k >= n_free).collect();

    let diag_max = (0..p).fold(F::zero(), |acc, k| acc.max(m[k][k].abs()));
    let tol = F::epsilon().sqrt() * (F::one() + diag_max) * (F::one() + norm_inf(q));
    let ridge = F::from(1e-10).unwrap_or_else(F::epsilon) * (F::one() + diag_max);

    let max_iter = 10 * (p + 1) + 50;
    for _ in 0..max_iter {
        let free: Vec<usize> = (0..p).filter(|&k| !at_bound[k]).collect();
        let target = solve_free(m, q, &free, ridge)?;

        // Does the unconstrained minimizer on the free set respect the signs?
        let mut alpha = F::one();
        let mut blocking = None;
        for (t, &k) in free.iter().enumerate() {
            if k >= n_free && target[t] < F::zero() {
                let denom = z[k] - target[t];
                let ratio = if denom > F::zero() {
                    z[k] / denom
                } else {
                    F::zero()
                };
                if ratio < alpha {
                    alpha = ratio;
                    blocking = Some(k);
                }
            }
        }

        for (t, &k) in free.iter().enumerate() {
            z[k] = z[k] + alpha * (target[t] - z[k]);
        }

        if let Some(k) = blocking {
            z[k] = F::zero();
            at_bound[k] = true;
            for &j in &free {
                if j >= n_free && z[j] <= F::zero() {
                    z[j] = F::zero();
                    at_bound[j] = true;
                }
            }
            continue;
        }

        // Release the bound variable with the most negative gradient.
        let grad: Vec<F> = (0..p).map(|k| dot(&m[k], &z) - q[k]).collect();
        let mut release = None;
        let mut most_negative = F::zero() - tol;
        for k in 0..p {
            if at_bound[k] && grad[k] < most_negative {
                most_negative = grad[k];
                release = Some(k);
            }
        }
        match release {
            Some(k) => at_bound[k] = false,
            None => return Some(z),
        }
    }

    None
}

/// Solve `M_FF z_F = q_F`, retrying with a small ridge if `M_FF` is singular.
fn solve_free<F: Float>(m: &[Vec<F>], q: &[F], free: &[usize], ridge: F) -> Option<Vec<F>> {
    if free.is_empty() {
        return Some(Vec::new());
    }
    let mut sub: Vec<Vec<F>> = free
        .iter()
        .map(|&i| free.iter().map(|&j| m[i][j]).collect())
        .collect();
    let rhs: Vec<F> = free.iter().map(|&i| q[i]).collect();
    if let Some(z) = lu_solve(&sub, &rhs) {
        return Some(z);
    }
    for (t, row) in sub.iter_mut().enumerate() {
        row[t] = row[t] + ridge;
    }
    lu_solve(&sub, &rhs)
}
