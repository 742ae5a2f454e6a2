use num_traits::Float;

use crate::bfgs::Bfgs;
use crate::constraints::LinearInequalities;
use crate::convergence::{dot, norm_1, norm_inf, ConvergenceParams};
use crate::line_search::{backtracking_merit, MeritParams};
use crate::linalg::mat_t_vec;
use crate::objective::ConstrainedObjective;
use crate::qp::{solve_qp, QpSolution};
use crate::result::{ConstrainedResult, TerminationReason};

/// Configuration for the SQP solver.
#[derive(Debug, Clone)]
pub struct SqpConfig<F> {
    /// Merit line search parameters.
    pub line_search: MeritParams<F>,
    /// Feasibility tolerance of the QP subproblem, relative to its right-hand side
    /// (default: 1e-8).
    pub qp_feas_tol: F,
    /// Convergence parameters.
    pub convergence: ConvergenceParams<F>,
}

impl Default for SqpConfig<f64> {
    fn default() -> Self {
        SqpConfig {
            line_search: MeritParams::default(),
            qp_feas_tol: 1e-8,
            convergence: ConvergenceParams::default(),
        }
    }
}

impl Default for SqpConfig<f32> {
    fn default() -> Self {
        SqpConfig {
            line_search: MeritParams::default(),
            qp_feas_tol: 1e-4,
            convergence: ConvergenceParams::default(),
        }
    }
}

struct Point<F> {
    value: F,
    grad: Vec<F>,
    eq: Vec<F>,
    jac: Vec<Vec<F>>,
}

/// Sequential quadratic programming with a damped BFGS Hessian.
///
/// Minimizes `obj` subject to its equality constraints and the linear inequalities
/// `ineq`. Each iteration solves
///
/// ```text
/// min ½ dᵀ B d + ∇fᵀ d   s.t.  J d = −c(x),  G d >= h − G x
/// ```
///
/// and backtracks along `d` on the L1 merit function
/// `f(x) + ρ (‖c(x)‖₁ + Σ max(0, h − G x))`.
pub fn sqp<F: Float, O: ConstrainedObjective<F>>(
    obj: &mut O,
    x0: &[F],
    ineq: &LinearInequalities<F>,
    config: &SqpConfig<F>,
) -> ConstrainedResult<F> {
    let n = x0.len();
    let conv = &config.convergence;

    if config.convergence.max_iter == 0 || ineq.dim() != n || obj.dim() != n {
        return ConstrainedResult {
            x: x0.to_vec(),
            value: F::zero(),
            gradient: vec![F::zero(); n],
            multipliers: Vec::new(),
            constraint_violation: F::zero(),
            iterations: 0,
            func_evals: 0,
            termination: TerminationReason::NumericalError,
        };
    }

    let mut func_evals = 0usize;
    let mut x = x0.to_vec();
    let mut pt = evaluate(obj, &x);
    func_evals += 1;
    let mut multipliers = vec![F::zero(); pt.eq.len()];

    let finish = |x: Vec<F>,
                  pt: Point<F>,
                  multipliers: Vec<F>,
                  iterations: usize,
                  func_evals: usize,
                  termination: TerminationReason| {
        let constraint_violation = violation_inf(&pt.eq, ineq, &x);
        ConstrainedResult {
            x,
            value: pt.value,
            gradient: pt.grad,
            multipliers,
            constraint_violation,
            iterations,
            func_evals,
            termination,
        }
    };

    if !is_finite_point(&pt) {
        return finish(x, pt, multipliers, 0, func_evals, TerminationReason::NumericalError);
    }

    let mut bfgs = Bfgs::new(n);
    let mut restarted = false;
    let mut penalty = F::zero();
    let one_and_half = F::from(1.5).unwrap_or_else(F::one);

    for iter in 0..conv.max_iter {
        let qp = match solve_subproblem(&bfgs, &pt, ineq, &x, config.qp_feas_tol) {
            Some(qp) => qp,
            None => {
                // A badly conditioned quasi-Newton matrix can make the QP unsolvable;
                // retry once from a scaled identity.
                bfgs.reset();
                match solve_subproblem(&bfgs, &pt, ineq, &x, config.qp_feas_tol) {
                    Some(qp) => qp,
                    None => {
                        log::debug!("sqp: QP subproblem failed at iteration {iter}");
                        return finish(
                            x,
                            pt,
                            multipliers,
                            iter,
                            func_evals,
                            TerminationReason::SubproblemFailed,
                        );
                    }
                }
            }
        };
        let d = qp.d;
        multipliers = qp.eq_multipliers;

        let viol = violation_inf(&pt.eq, ineq, &x);
        let gd = dot(&pt.grad, &d);
        let complementarity = dot(&multipliers, &pt.eq).abs();
        if viol <= conv.constraint_tol
            && gd.abs() + complementarity <= conv.grad_tol * (F::one() + pt.value.abs())
        {
            log::debug!("sqp: KKT point after {iter} iterations, f = {:?}", pt.value.to_f64());
            return finish(x, pt, multipliers, iter, func_evals, TerminationReason::Optimal);
        }
        if viol <= conv.constraint_tol
            && norm_inf(&d) <= conv.step_tol * (F::one() + norm_inf(&x))
        {
            return finish(x, pt, multipliers, iter, func_evals, TerminationReason::StepSize);
        }

        let max_mult = multipliers
            .iter()
            .chain(qp.ineq_multipliers.iter())
            .fold(F::zero(), |m, &v| m.max(v.abs()));
        penalty = penalty.max(one_and_half * max_mult);

        let phi0 = pt.value + penalty * violation_1(&pt.eq, ineq, &x);
        let slope = gd - penalty * violation_1(&pt.eq, ineq, &x);

        let step = backtracking_merit(&x, &d, phi0, slope, &config.line_search, |trial| {
            func_evals += 1;
            let trial_pt = evaluate(obj, trial);
            if !is_finite_point(&trial_pt) {
                return None;
            }
            let phi = trial_pt.value + penalty * violation_1(&trial_pt.eq, ineq, trial);
            Some((phi, trial_pt))
        });

        let step = match step {
            Some(step) => step,
            None if !restarted => {
                // The quasi-Newton direction can stop being a descent direction for the
                // merit function; retry along the scaled steepest-descent QP step.
                log::debug!("sqp: merit line search failed at iteration {iter}, resetting BFGS");
                bfgs.reset();
                restarted = true;
                continue;
            }
            None if viol <= conv.constraint_tol => {
                // Even the steepest-descent step hits the step-length floor: no
                // representable decrease is left at this feasible point.
                log::debug!("sqp: no merit decrease above the step-length floor at iteration {iter}");
                return finish(x, pt, multipliers, iter, func_evals, TerminationReason::StepSize);
            }
            None => {
                log::debug!("sqp: merit line search failed at iteration {iter}");
                return finish(
                    x,
                    pt,
                    multipliers,
                    iter,
                    func_evals,
                    TerminationReason::LineSearchFailed,
                );
            }
        };
        restarted = false;

        let new_pt = step.payload;
        let s: Vec<F> = step.x.iter().zip(&x).map(|(&a, &b)| a - b).collect();
        // Inequalities are linear, so only the equality terms change the Lagrangian gradient.
        let lag_new = lagrangian_grad(&new_pt, &multipliers, n);
        let lag_old = lagrangian_grad(&pt, &multipliers, n);
        let y: Vec<F> = lag_new.iter().zip(&lag_old).map(|(&a, &b)| a - b).collect();
        bfgs.update(&s, &y);

        let f_prev = pt.value;
        x = step.x;
        pt = new_pt;

        log::trace!(
            "sqp: iter {iter} f = {:?} alpha = {:?} violation = {:?}",
            pt.value.to_f64(),
            step.alpha.to_f64(),
            violation_inf(&pt.eq, ineq, &x).to_f64()
        );

        if conv.func_tol > F::zero()
            && (f_prev - pt.value).abs() < conv.func_tol
            && violation_inf(&pt.eq, ineq, &x) <= conv.constraint_tol
        {
            return finish(
                x,
                pt,
                multipliers,
                iter + 1,
                func_evals,
                TerminationReason::FunctionChange,
            );
        }
    }

    log::debug!("sqp: reached {} iterations", conv.max_iter);
    finish(
        x,
        pt,
        multipliers,
        conv.max_iter,
        func_evals,
        TerminationReason::MaxIterations,
    )
}

fn evaluate<F: Float, O: ConstrainedObjective<F>>(obj: &mut O, x: &[F]) -> Point<F> {
    let (value, grad) = obj.eval_grad(x);
    let eq = obj.equalities(x);
    let jac = obj.equality_jacobian(x);
    Point {
        value,
        grad,
        eq,
        jac,
    }
}

fn is_finite_point<F: Float>(pt: &Point<F>) -> bool {
    pt.value.is_finite()
        && pt.grad.iter().all(|v| v.is_finite())
        && pt.eq.iter().all(|v| v.is_finite())
        && pt.jac.iter().flatten().all(|v| v.is_finite())
}

fn solve_subproblem<F: Float>(
    bfgs: &Bfgs<F>,
    pt: &Point<F>,
    ineq: &LinearInequalities<F>,
    x: &[F],
    feas_tol: F,
) -> Option<QpSolution<F>> {
    let neg_c: Vec<F> = pt.eq.iter().map(|&c| F::zero() - c).collect();
    let h: Vec<F> = ineq
        .slacks(x)
        .into_iter()
        .map(|s| F::zero() - s)
        .collect();
    solve_qp(
        bfgs.matrix(),
        &pt.grad,
        &pt.jac,
        &neg_c,
        ineq.rows(),
        &h,
        feas_tol,
    )
}

fn lagrangian_grad<F: Float>(pt: &Point<F>, multipliers: &[F], n: usize) -> Vec<F> {
    let jt = mat_t_vec(&pt.jac, multipliers, n);
    pt.grad.iter().zip(&jt).map(|(&g, &j)| g - j).collect()
}

fn violation_1<F: Float>(eq: &[F], ineq: &LinearInequalities<F>, x: &[F]) -> F {
    let ineq_viol = ineq
        .slacks(x)
        .into_iter()
        .fold(F::zero(), |s, v| s + (F::zero() - v).max(F::zero()));
    norm_1(eq) + ineq_viol
}

fn violation_inf<F: Float>(eq: &[F], ineq: &LinearInequalities<F>, x: &[F]) -> F {
    norm_inf(eq).max(ineq.max_violation(x))
}
