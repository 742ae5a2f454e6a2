use num_traits::Float;

use crate::bfgs::Bfgs;
use crate::constraints::LinearInequalities;
use crate::convergence::{axpy, dot, norm, norm_inf, ConvergenceParams};
use crate::linalg::{gram, lu_back_solve, lu_factor, mat_t_vec, mat_vec, LuFactors};
use crate::objective::ConstrainedObjective;
use crate::result::{ConstrainedResult, TerminationReason};

/// Configuration for the trust-region interior-point solver.
#[derive(Debug, Clone)]
pub struct TrustConstrConfig<F> {
    /// Initial trust-region radius (default: 1.0).
    pub initial_radius: F,
    /// Maximum trust-region radius (default: 1000.0).
    pub max_radius: F,
    /// Acceptance threshold for the ratio of actual to predicted reduction (default: 0.1).
    pub eta: F,
    /// Initial log-barrier parameter (default: 0.1).
    pub initial_barrier: F,
    /// Factor applied to the barrier parameter once a barrier subproblem has converged
    /// (default: 0.2).
    pub barrier_decay: F,
    /// The run is optimal once a barrier subproblem with parameter below this value has
    /// converged (default: 1e-8).
    pub barrier_tol: F,
    /// Fraction of the distance to the inequality boundary a step may cover (default: 0.995).
    pub fraction_to_boundary: F,
    /// Maximum CG iterations per tangential subproblem (default: 2 * dim).
    /// If 0, defaults to 2 * dim.
    pub max_cg_iter: usize,
    /// Convergence parameters.
    pub convergence: ConvergenceParams<F>,
}

impl Default for TrustConstrConfig<f64> {
    fn default() -> Self {
        TrustConstrConfig {
            initial_radius: 1.0,
            max_radius: 1000.0,
            eta: 0.1,
            initial_barrier: 0.1,
            barrier_decay: 0.2,
            barrier_tol: 1e-8,
            fraction_to_boundary: 0.995,
            max_cg_iter: 0,
            convergence: ConvergenceParams {
                max_iter: 1000,
                ..Default::default()
            },
        }
    }
}

impl Default for TrustConstrConfig<f32> {
    fn default() -> Self {
        TrustConstrConfig {
            initial_radius: 1.0,
            max_radius: 1000.0,
            eta: 0.1,
            initial_barrier: 0.1,
            barrier_decay: 0.2,
            barrier_tol: 1e-5,
            fraction_to_boundary: 0.995,
            max_cg_iter: 0,
            convergence: ConvergenceParams {
                max_iter: 1000,
                ..Default::default()
            },
        }
    }
}

/// Trust-region interior-point method.
///
/// The linear inequalities are handled with a log barrier
/// `f(x) − μ Σ ln(G x − h)` whose parameter `μ` is driven to zero; the equality
/// constraints with a Byrd–Omojokun composite step: a dogleg normal step reducing
/// `‖c + J v‖` inside `0.8 Δ`, then a projected Steihaug–Toint CG step in the null space
/// of `J` inside the remaining radius. Steps are cut back to keep a fraction of the
/// distance to the inequality boundary and are judged on the merit function
/// `f − μ Σ ln s + ν ‖c‖`.
///
/// If `x0` does not strictly satisfy the inequalities it is first projected into their
/// interior.
pub fn trust_constr<F: Float, O: ConstrainedObjective<F>>(
    obj: &mut O,
    x0: &[F],
    ineq: &LinearInequalities<F>,
    config: &TrustConstrConfig<F>,
) -> ConstrainedResult<F> {
    let n = x0.len();
    let conv = &config.convergence;

    let invalid = conv.max_iter == 0
        || config.initial_radius <= F::zero()
        || config.max_radius <= F::zero()
        || ineq.dim() != n
        || obj.dim() != n;
    if invalid {
        return early_exit(x0, TerminationReason::NumericalError);
    }

    let mut x = if ineq.slacks(x0).iter().all(|&s| s > F::zero()) {
        x0.to_vec()
    } else {
        match strictly_interior(ineq, x0) {
            Some(x) => {
                log::debug!("trust_constr: moved infeasible start into the interior");
                x
            }
            None => return early_exit(x0, TerminationReason::InfeasibleStart),
        }
    };

    let max_cg = if config.max_cg_iter == 0 {
        2 * n
    } else {
        config.max_cg_iter
    };

    let (mut f_val, mut grad) = obj.eval_grad(&x);
    let mut c_val = obj.equalities(&x);
    let mut jac = obj.equality_jacobian(&x);
    let mut func_evals = 1usize;
    let mut multipliers = vec![F::zero(); c_val.len()];

    let mut mu = if ineq.is_empty() {
        F::zero()
    } else {
        config.initial_barrier
    };
    let mut radius = config.initial_radius;
    let mut penalty = F::one();
    let mut bfgs = Bfgs::new(n);

    let two = F::one() + F::one();
    let quarter = F::one() / (two * two);
    let three_quarter = F::one() - quarter;
    let point_eight = F::from(0.8).unwrap_or_else(F::one);
    let point_nine = F::from(0.9).unwrap_or_else(F::one);
    let rho_nu = F::from(0.1).unwrap_or_else(F::zero);

    macro_rules! finish {
        ($iters:expr, $reason:expr) => {{
            let constraint_violation = norm_inf(&c_val).max(ineq.max_violation(&x));
            return ConstrainedResult {
                x,
                value: f_val,
                gradient: grad,
                multipliers,
                constraint_violation,
                iterations: $iters,
                func_evals,
                termination: $reason,
            };
        }};
    }

    if !f_val.is_finite() || grad.iter().any(|g| !g.is_finite()) {
        finish!(0, TerminationReason::NumericalError);
    }

    // Ends a barrier subproblem: stops at the final barrier parameter, otherwise
    // shrinks `mu` and restarts the iteration. Evaluates to `false` when the point
    // still has to become feasible.
    macro_rules! barrier_stage_done {
        ($iter:expr, $feas:expr) => {{
            if mu <= config.barrier_tol {
                if $feas <= conv.constraint_tol {
                    log::debug!(
                        "trust_constr: KKT point after {} iterations, f = {:?}",
                        $iter,
                        f_val.to_f64()
                    );
                    finish!($iter, TerminationReason::Optimal);
                }
                false
            } else {
                mu = mu * config.barrier_decay;
                radius = radius.max(config.initial_radius);
                log::trace!("trust_constr: barrier parameter reduced to {:?}", mu.to_f64());
                true
            }
        }};
    }

    for iter in 0..conv.max_iter {
        let slacks = ineq.slacks(&x);
        let barrier_grad = barrier_gradient(ineq, &slacks, mu, n);
        let grad_phi: Vec<F> = grad.iter().zip(&barrier_grad).map(|(&g, &b)| g + b).collect();

        let projector = match Projector::new(&jac, n) {
            Some(p) => p,
            None => finish!(iter, TerminationReason::NumericalError),
        };
        multipliers = projector.multipliers(&grad_phi);
        let lag_grad: Vec<F> = grad_phi
            .iter()
            .zip(mat_t_vec(&jac, &multipliers, n))
            .map(|(&g, jl)| g - jl)
            .collect();
        let opt = norm_inf(&lag_grad);
        let feas = norm_inf(&c_val);
        let stage_tol = mu.max(conv.grad_tol);
        let stage_feas = mu.max(conv.constraint_tol);

        if opt <= stage_tol && feas <= stage_feas && barrier_stage_done!(iter, feas) {
            continue;
        }

        if radius < conv.step_tol * (F::one() + norm_inf(&x)) {
            if feas > conv.constraint_tol {
                log::debug!("trust_constr: trust radius collapsed at an infeasible point");
                finish!(iter, TerminationReason::Infeasible);
            }
            if mu <= config.barrier_tol {
                finish!(iter, TerminationReason::StepSize);
            }
            mu = mu * config.barrier_decay;
            radius = config.initial_radius;
            continue;
        }

        // Hessian of the barrier Lagrangian: quasi-Newton part plus exact barrier term.
        let hess = barrier_hessian(bfgs.matrix(), ineq, &slacks, mu);

        let normal_radius = point_eight * radius;
        let v = normal_step(&jac, &c_val, &projector, normal_radius, n);
        let v_norm = norm(&v);
        let tangential_radius = (radius * radius - v_norm * v_norm).max(F::zero()).sqrt();

        let hv = mat_vec(&hess, &v);
        let reduced_grad: Vec<F> = grad_phi.iter().zip(&hv).map(|(&g, &h)| g + h).collect();
        let w = projected_cg(&hess, &reduced_grad, &projector, tangential_radius, max_cg);
        let mut d: Vec<F> = v.iter().zip(&w).map(|(&a, &b)| a + b).collect();

        let alpha = max_step_to_boundary(ineq, &slacks, &d, config.fraction_to_boundary);
        if alpha < F::one() {
            for di in d.iter_mut() {
                *di = *di * alpha;
            }
        }
        let step_norm = norm(&d);
        let quad = dot(&grad_phi, &d) + dot(&d, &mat_vec(&hess, &d)) / two;

        // The model minimizer lies strictly inside the region and promises almost
        // nothing: the barrier subproblem is solved to the accuracy the model allows.
        let model_stalled = alpha >= F::one()
            && step_norm < point_nine * radius
            && quad.abs() <= stage_tol * (F::one() + f_val.abs());
        if model_stalled && feas <= stage_feas && barrier_stage_done!(iter, feas) {
            continue;
        }

        let c_norm = norm(&c_val);
        let linearized: Vec<F> = c_val
            .iter()
            .zip(mat_vec(&jac, &d))
            .map(|(&c, jd)| c + jd)
            .collect();
        let lin_reduction = c_norm - norm(&linearized);
        if lin_reduction > F::zero() {
            let needed = quad / ((F::one() - rho_nu) * lin_reduction);
            penalty = penalty.max(needed);
        }
        let predicted = penalty * lin_reduction - quad;
        let merit_old = f_val - mu * log_sum(&slacks) + penalty * c_norm;

        let mut accepted = None;
        let mut ratio = F::zero();
        if predicted > F::zero() {
            let x_new = axpy(&x, F::one(), &d);
            if let Some(trial) = evaluate_trial(obj, ineq, &x_new, mu, penalty, &mut func_evals) {
                ratio = (merit_old - trial.merit) / predicted;
                if ratio > config.eta {
                    accepted = Some((d.clone(), x_new, trial));
                } else if !trial.c.is_empty() && norm(&trial.c) > norm(&linearized) {
                    // Second-order correction: pull the trial point back onto the
                    // linearization of the equalities before giving up on the step.
                    if let Some(corr) = projector.gauss_newton(&trial.c) {
                        let d_soc: Vec<F> = d.iter().zip(&corr).map(|(&a, &b)| a + b).collect();
                        let x_soc = axpy(&x, F::one(), &d_soc);
                        if let Some(soc) =
                            evaluate_trial(obj, ineq, &x_soc, mu, penalty, &mut func_evals)
                        {
                            let ratio_soc = (merit_old - soc.merit) / predicted;
                            if ratio_soc > config.eta {
                                ratio = ratio_soc;
                                accepted = Some((d_soc, x_soc, soc));
                            }
                        }
                    }
                }
            }
        }

        if ratio < quarter {
            radius = quarter * step_norm.min(radius);
        } else if ratio > three_quarter && step_norm >= point_nine * radius {
            radius = (two * radius).min(config.max_radius);
        }

        if let Some((step, x_new, trial)) = accepted {
            let jac_new = obj.equality_jacobian(&x_new);
            let lag_new = lagrangian_grad(&trial.grad, &jac_new, &multipliers, n);
            let lag_old = lagrangian_grad(&grad, &jac, &multipliers, n);
            let y: Vec<F> = lag_new.iter().zip(&lag_old).map(|(&a, &b)| a - b).collect();
            bfgs.update(&step, &y);

            let f_prev = f_val;
            x = x_new;
            f_val = trial.value;
            grad = trial.grad;
            c_val = trial.c;
            jac = jac_new;

            log::trace!(
                "trust_constr: iter {iter} f = {:?} radius = {:?} mu = {:?}",
                f_val.to_f64(),
                radius.to_f64(),
                mu.to_f64()
            );

            if conv.func_tol > F::zero()
                && mu <= config.barrier_tol
                && (f_prev - f_val).abs() < conv.func_tol
                && norm_inf(&c_val) <= conv.constraint_tol
            {
                finish!(iter + 1, TerminationReason::FunctionChange);
            }
        }
    }

    log::debug!("trust_constr: reached {} iterations", conv.max_iter);
    finish!(conv.max_iter, TerminationReason::MaxIterations);
}

/// A trial point that lies strictly inside the inequalities and evaluates finitely.
struct Trial<F> {
    value: F,
    grad: Vec<F>,
    c: Vec<F>,
    merit: F,
}

fn evaluate_trial<F: Float, O: ConstrainedObjective<F>>(
    obj: &mut O,
    ineq: &LinearInequalities<F>,
    x: &[F],
    mu: F,
    penalty: F,
    func_evals: &mut usize,
) -> Option<Trial<F>> {
    let slacks = ineq.slacks(x);
    if slacks.iter().any(|&s| s <= F::zero()) {
        return None;
    }
    let (value, grad) = obj.eval_grad(x);
    let c = obj.equalities(x);
    *func_evals += 1;
    if !value.is_finite() || c.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let merit = value - mu * log_sum(&slacks) + penalty * norm(&c);
    Some(Trial {
        value,
        grad,
        c,
        merit,
    })
}

fn early_exit<F: Float>(x0: &[F], termination: TerminationReason) -> ConstrainedResult<F> {
    ConstrainedResult {
        x: x0.to_vec(),
        value: F::zero(),
        gradient: vec![F::zero(); x0.len()],
        multipliers: Vec::new(),
        constraint_violation: F::zero(),
        iterations: 0,
        func_evals: 0,
        termination,
    }
}

/// Orthogonal projection onto the null space of the equality Jacobian.
struct Projector<F> {
    jac: Vec<Vec<F>>,
    factors: Option<LuFactors<F>>,
    n: usize,
}

impl<F: Float> Projector<F> {
    fn new(jac: &[Vec<F>], n: usize) -> Option<Self> {
        if jac.is_empty() {
            return Some(Projector {
                jac: Vec::new(),
                factors: None,
                n,
            });
        }
        let mut jjt = gram(jac);
        let factors = match lu_factor(&jjt) {
            Some(f) => f,
            None => {
                let diag_max = (0..jjt.len()).fold(F::zero(), |m, i| m.max(jjt[i][i]));
                let ridge = F::from(1e-10).unwrap_or_else(F::epsilon) * (F::one() + diag_max);
                for (i, row) in jjt.iter_mut().enumerate() {
                    row[i] = row[i] + ridge;
                }
                lu_factor(&jjt)?
            }
        };
        Some(Projector {
            jac: jac.to_vec(),
            factors: Some(factors),
            n,
        })
    }

    /// `(J Jᵀ)⁻¹ J r`: least-squares multipliers for the gradient `r`.
    fn multipliers(&self, r: &[F]) -> Vec<F> {
        match &self.factors {
            Some(f) => lu_back_solve(f, &mat_vec(&self.jac, r)),
            None => Vec::new(),
        }
    }

    /// `r − Jᵀ (J Jᵀ)⁻¹ J r`.
    fn project(&self, r: &[F]) -> Vec<F> {
        if self.factors.is_none() {
            return r.to_vec();
        }
        let y = self.multipliers(r);
        let jty = mat_t_vec(&self.jac, &y, self.n);
        r.iter().zip(&jty).map(|(&a, &b)| a - b).collect()
    }

    /// Minimum-norm solution of `J v = −c`.
    fn gauss_newton(&self, c: &[F]) -> Option<Vec<F>> {
        let f = self.factors.as_ref()?;
        let y = lu_back_solve(f, c);
        Some(
            mat_t_vec(&self.jac, &y, self.n)
                .into_iter()
                .map(|v| F::zero() - v)
                .collect(),
        )
    }
}

/// Dogleg step for `min ‖c + J v‖²` subject to `‖v‖ <= radius`.
fn normal_step<F: Float>(
    jac: &[Vec<F>],
    c: &[F],
    projector: &Projector<F>,
    radius: F,
    n: usize,
) -> Vec<F> {
    let zero = vec![F::zero(); n];
    if jac.is_empty() || norm_inf(c) == F::zero() {
        return zero;
    }

    let jtc = mat_t_vec(jac, c, n);
    let jtc_sq = dot(&jtc, &jtc);
    if jtc_sq <= F::epsilon() * F::epsilon() {
        return zero;
    }
    let j_jtc = mat_vec(jac, &jtc);
    let cauchy_len = jtc_sq / dot(&j_jtc, &j_jtc);
    let cauchy: Vec<F> = jtc.iter().map(|&g| F::zero() - cauchy_len * g).collect();

    let gauss_newton = projector.gauss_newton(c);
    if let Some(gn) = &gauss_newton {
        if norm(gn) <= radius {
            return gn.clone();
        }
    }

    let cauchy_norm = norm(&cauchy);
    if cauchy_norm >= radius {
        let scale = radius / cauchy_norm;
        return cauchy.into_iter().map(|v| v * scale).collect();
    }

    match gauss_newton {
        Some(gn) => {
            let dir: Vec<F> = gn.iter().zip(&cauchy).map(|(&a, &b)| a - b).collect();
            let tau = boundary_tau(&cauchy, &dir, radius);
            axpy(&cauchy, tau, &dir)
        }
        None => cauchy,
    }
}

/// Steihaug–Toint CG restricted to the null space of the equality Jacobian.
///
/// Approximately minimizes `m(s) = gᵀ s + ½ sᵀ H s` over `s ∈ null(J)` with
/// `‖s‖ <= radius`.
fn projected_cg<F: Float>(
    hess: &[Vec<F>],
    grad: &[F],
    projector: &Projector<F>,
    radius: F,
    max_iter: usize,
) -> Vec<F> {
    let n = grad.len();
    let mut s = vec![F::zero(); n];
    if radius <= F::zero() {
        return s;
    }

    let mut r: Vec<F> = grad.to_vec();
    let mut z = projector.project(&r);
    let mut d: Vec<F> = z.iter().map(|&zi| F::zero() - zi).collect();
    let mut r_dot_z = dot(&r, &z);

    let stop = F::epsilon().sqrt() * r_dot_z.abs().sqrt();
    if r_dot_z.abs().sqrt() < F::epsilon() {
        return s;
    }

    for _ in 0..max_iter {
        let hd = mat_vec(hess, &d);
        let d_hd = dot(&d, &hd);

        // Negative curvature: go to the boundary
        if d_hd <= F::zero() {
            let tau = boundary_tau(&s, &d, radius);
            return axpy(&s, tau, &d);
        }

        let alpha = r_dot_z / d_hd;
        let s_next = axpy(&s, alpha, &d);
        if norm(&s_next) >= radius {
            let tau = boundary_tau(&s, &d, radius);
            return axpy(&s, tau, &d);
        }
        s = s_next;

        r = axpy(&r, alpha, &hd);
        z = projector.project(&r);
        let r_dot_z_new = dot(&r, &z);
        if r_dot_z_new.abs().sqrt() <= stop {
            return s;
        }

        let beta = r_dot_z_new / r_dot_z;
        r_dot_z = r_dot_z_new;
        for i in 0..n {
            d[i] = F::zero() - z[i] + beta * d[i];
        }
    }

    s
}

/// Find `tau > 0` such that `||s + tau * d|| = radius`.
///
/// Solves `||s + tau * d||^2 = radius^2` for the positive root.
fn boundary_tau<F: Float>(s: &[F], d: &[F], radius: F) -> F {
    let two = F::one() + F::one();
    let a = dot(d, d);
    let b = two * dot(s, d);
    let c = dot(s, s) - radius * radius;

    if a <= F::zero() {
        return F::zero();
    }
    let disc = b * b - (two + two) * a * c;
    if disc < F::zero() {
        return F::zero();
    }

    let sqrt_disc = disc.sqrt();
    let tau1 = (F::zero() - b + sqrt_disc) / (two * a);
    let tau2 = (F::zero() - b - sqrt_disc) / (two * a);

    if tau1 > F::zero() {
        if tau2 > F::zero() {
            tau1.min(tau2)
        } else {
            tau1
        }
    } else {
        tau2.max(F::zero())
    }
}

/// `−μ Gᵀ S⁻¹ 1`.
fn barrier_gradient<F: Float>(
    ineq: &LinearInequalities<F>,
    slacks: &[F],
    mu: F,
    n: usize,
) -> Vec<F> {
    let weights: Vec<F> = slacks.iter().map(|&s| F::zero() - mu / s).collect();
    mat_t_vec(ineq.rows(), &weights, n)
}

/// `B + μ Gᵀ S⁻² G`.
fn barrier_hessian<F: Float>(
    b: &[Vec<F>],
    ineq: &LinearInequalities<F>,
    slacks: &[F],
    mu: F,
) -> Vec<Vec<F>> {
    let mut h = b.to_vec();
    for (row, &s) in ineq.rows().iter().zip(slacks) {
        let w = mu / (s * s);
        for (i, hi) in h.iter_mut().enumerate() {
            if row[i] == F::zero() {
                continue;
            }
            for (j, hij) in hi.iter_mut().enumerate() {
                *hij = *hij + w * row[i] * row[j];
            }
        }
    }
    h
}

/// Largest `alpha <= 1` with `G (alpha d) >= −tau s`.
fn max_step_to_boundary<F: Float>(
    ineq: &LinearInequalities<F>,
    slacks: &[F],
    d: &[F],
    tau: F,
) -> F {
    ineq.rows()
        .iter()
        .zip(slacks)
        .fold(F::one(), |alpha, (row, &s)| {
            let gd = dot(row, d);
            if gd < F::zero() {
                alpha.min(F::zero() - tau * s / gd)
            } else {
                alpha
            }
        })
}

fn log_sum<F: Float>(slacks: &[F]) -> F {
    slacks.iter().fold(F::zero(), |acc, &s| acc + s.ln())
}

fn lagrangian_grad<F: Float>(grad: &[F], jac: &[Vec<F>], multipliers: &[F], n: usize) -> Vec<F> {
    let jt = mat_t_vec(jac, multipliers, n);
    grad.iter().zip(&jt).map(|(&g, &j)| g - j).collect()
}

/// Push `x0` strictly inside `ineq` by cyclic projections onto the violated half-spaces.
fn strictly_interior<F: Float>(ineq: &LinearInequalities<F>, x0: &[F]) -> Option<Vec<F>> {
    let margin_scale = F::from(1e-3).unwrap_or_else(F::epsilon);
    let margins: Vec<F> = ineq
        .rhs()
        .iter()
        .map(|&b| margin_scale * (F::one() + b.abs()))
        .collect();

    let mut x = x0.to_vec();
    for _ in 0..100 {
        let mut moved = false;
        for ((row, &b), &margin) in ineq.rows().iter().zip(ineq.rhs()).zip(&margins) {
            let slack = dot(row, &x) - b;
            if slack < margin {
                let row_sq = dot(row, row);
                if row_sq == F::zero() {
                    return None;
                }
                x = axpy(&x, (margin - slack) / row_sq, row);
                moved = true;
            }
        }
        if !moved {
            break;
        }
    }

    ineq.slacks(&x)
        .iter()
        .all(|&s| s > F::zero())
        .then_some(x)
}
