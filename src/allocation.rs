//! Sample allocation: how many evaluations of each model a budget buys.
//!
//! MLMC and MFMC have closed-form optimal allocations. Every other estimator is
//! allocated numerically by minimizing `log10 Var` over the per-model sample counts
//! subject to the budget, with either SQP or a trust-region interior-point method
//! from [`acvmc_optim`].

use std::fmt;

use acvmc_optim::{
    sqp, trust_constr, ConstrainedObjective, LinearInequalities, Objective, SqpConfig,
    TrustConstrConfig,
};
use log::{debug, info, warn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::api::gradient;
use crate::covariance::{
    compute_correlations_from_covariance, standardize_sample_ratios, validate_costs, Covariance,
};
use crate::discrepancy::DiscrepancyStrategy;
use crate::dual::Dual;
use crate::error::{check_len, AcvError, Result};
use crate::estimator::{Acv, Estimator};
use crate::scalar::Scalar;
use crate::variance::{check_mfmc_model_ordering, rsquared_mfmc, rsquared_mlmc};

/// Relative margin by which an initial guess is moved inside the bounds.
const INTERIOR_MARGIN: f64 = 1e-2;

/// Relative gap kept between a sample count and the count of its reference model
/// during the numerical allocation, where the discrepancy would vanish.
pub const RATIO_MARGIN: f64 = 1e-6;

/// Constrained optimizer used by [`allocate_samples_acv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OptimMethod {
    /// Sequential quadratic programming.
    #[default]
    Sqp,
    /// Trust-region interior-point method.
    TrustRegion,
}

impl fmt::Display for OptimMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimMethod::Sqp => write!(f, "SQP"),
            OptimMethod::TrustRegion => write!(f, "trust-region"),
        }
    }
}

/// Options for the numerical allocation.
#[derive(Debug, Clone)]
pub struct AllocationConfig {
    /// Optimizer for the numerical allocation (default: SQP).
    pub method: OptimMethod,
    /// Round the optimum to whole sample counts (default: true).
    pub standardize: bool,
    /// Settings used when `method` is [`OptimMethod::Sqp`].
    pub sqp: SqpConfig<f64>,
    /// Settings used when `method` is [`OptimMethod::TrustRegion`].
    pub trust_region: TrustConstrConfig<f64>,
    /// How far over budget a (K, L) configuration may land after rounding and still
    /// be selected by [`allocate_samples_acv_best_kl`] (default: 10).
    pub cost_slack: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        AllocationConfig {
            method: OptimMethod::Sqp,
            standardize: true,
            sqp: SqpConfig::default(),
            trust_region: TrustConstrConfig::default(),
            cost_slack: 10.0,
        }
    }
}

/// A sample allocation.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Allocation {
    /// Number of high-fidelity samples.
    pub nhf_samples: f64,
    /// `r_i = N_i / Nhf` for each low-fidelity model.
    pub ratios: Vec<f64>,
    /// `log10` of the estimator variance at this allocation.
    pub log10_variance: f64,
}

impl Allocation {
    /// Estimator variance, `10^log10_variance`.
    pub fn variance(&self) -> f64 {
        10f64.powf(self.log10_variance)
    }

    /// `[Nhf, r_1 Nhf, …]`.
    pub fn samples_per_model(&self) -> Vec<f64> {
        std::iter::once(self.nhf_samples)
            .chain(self.ratios.iter().map(|r| r * self.nhf_samples))
            .collect()
    }

    /// Total cost `Σ c_i N_i`.
    pub fn cost(&self, costs: &[f64]) -> f64 {
        self.samples_per_model()
            .iter()
            .zip(costs)
            .map(|(n, c)| n * c)
            .sum()
    }
}

/// Best allocation found by [`allocate_samples_acv_best_kl`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KlAllocation {
    /// The selected allocation.
    pub allocation: Allocation,
    /// `K` of the selected partition; `None` when the nested (ACV-MF) baseline was
    /// best.
    pub k: Option<usize>,
    /// `L` of the selected partition; `None` with `k`.
    pub l: Option<usize>,
}

fn validate_budget(target_cost: f64) -> Result<()> {
    if target_cost.is_finite() && target_cost > 0.0 {
        Ok(())
    } else {
        Err(AcvError::InvalidBudget {
            target: target_cost,
        })
    }
}

// ============================================================
// Closed-form allocations
// ============================================================

/// Variance of the discrepancy between models `i` and `i + 1`.
fn discrepancy_variance(cov: &Covariance, i: usize) -> f64 {
    cov[(i, i)] + cov[(i + 1, i + 1)] - 2.0 * cov[(i, i + 1)]
}

/// Optimal MLMC allocation for `target_cost`.
///
/// Level `i` couples models `i` and `i + 1`; its optimal sample count is
/// proportional to `sqrt(Var Δ_i / (c_i + c_{i+1}))`.
pub fn allocate_samples_mlmc(
    cov: &Covariance,
    costs: &[f64],
    target_cost: f64,
    standardize: bool,
) -> Result<Allocation> {
    let n = cov.nmodels();
    validate_costs(costs, n)?;
    validate_budget(target_cost)?;

    let mut level_samples = Vec::with_capacity(n);
    let mut sum = 0.0;
    for i in 0..n {
        let (var_delta, cost_delta) = if i + 1 < n {
            (discrepancy_variance(cov, i), costs[i] + costs[i + 1])
        } else {
            (cov[(i, i)], costs[i])
        };
        level_samples.push((var_delta / cost_delta).sqrt());
        sum += (var_delta * cost_delta).sqrt();
    }

    let variance = sum * sum / target_cost;
    let sqrt_lambda = sum / variance;
    let level: Vec<f64> = level_samples.iter().map(|v| v * sqrt_lambda).collect();
    let mut nhf = level[0];
    let mut ratios: Vec<f64> = (1..n).map(|i| (level[i - 1] + level[i]) / nhf).collect();

    if standardize {
        (nhf, ratios) = standardize_sample_ratios(nhf.max(1.0), &ratios);
    }

    let gamma = 1.0 - rsquared_mlmc(cov, &ratios)?;
    let log10_variance = gamma.log10() + cov.hf_variance().log10() - nhf.log10();
    if log10_variance.is_nan() {
        return Err(AcvError::NanVariance);
    }
    debug!("MLMC allocation: Nhf = {nhf}, ratios = {ratios:?}");
    Ok(Allocation {
        nhf_samples: nhf,
        ratios,
        log10_variance,
    })
}

/// Optimal MFMC allocation for `target_cost` (Peherstorfer et al.).
///
/// The low-fidelity models must be ordered by decreasing correlation with the
/// high-fidelity model.
pub fn allocate_samples_mfmc(
    cov: &Covariance,
    costs: &[f64],
    target_cost: f64,
    standardize: bool,
) -> Result<Allocation> {
    let n = cov.nmodels();
    validate_costs(costs, n)?;
    validate_budget(target_cost)?;
    check_mfmc_model_ordering(cov)?;

    let corr = compute_correlations_from_covariance(cov.matrix());
    let rho2 = |i: usize| if i < n { corr[(0, i)] * corr[(0, i)] } else { 0.0 };
    let denom = 1.0 - rho2(1);
    if denom <= 0.0 {
        return Err(AcvError::covariance(
            "first low-fidelity model is perfectly correlated with the high-fidelity model",
        ));
    }

    let r: Vec<f64> = (0..n)
        .map(|i| {
            let rho_i = if i == 0 { 1.0 } else { rho2(i) };
            (costs[0] * (rho_i - rho2(i + 1)) / (costs[i] * denom)).sqrt()
        })
        .collect();
    let cost_per_hf: f64 = costs.iter().zip(&r).map(|(c, r)| c * r).sum();
    let mut nhf = (target_cost / cost_per_hf).max(1.0);
    let mut ratios = r[1..].to_vec();

    if standardize {
        (nhf, ratios) = standardize_sample_ratios(nhf, &ratios);
    }

    let gamma = 1.0 - rsquared_mfmc(cov, &ratios)?;
    let log10_variance = gamma.log10() + cov.hf_variance().log10() - nhf.log10();
    debug!("MFMC allocation: Nhf = {nhf}, ratios = {ratios:?}");
    Ok(Allocation {
        nhf_samples: nhf,
        ratios,
        log10_variance,
    })
}

/// Lagrange multiplier of the MLMC allocation problem at `nhf_samples`.
///
/// At the closed-form optimum the gradient of `λ · Var + cost` vanishes for this
/// `λ`.
pub fn mlmc_lagrange_multiplier(cov: &Covariance, costs: &[f64], nhf_samples: f64) -> Result<f64> {
    validate_costs(costs, cov.nmodels())?;
    let var_delta = discrepancy_variance(cov, 0);
    Ok(nhf_samples * nhf_samples / (var_delta / (costs[0] + costs[1])))
}

// ============================================================
// Numerical allocation
// ============================================================

/// `min log10 Var` over sample counts `N_i = scale_i · y_i`, subject to the linear
/// budget `Σ c_i N_i / target = 1`.
struct AllocationProblem<'a, E> {
    estimator: &'a E,
    scale: Vec<f64>,
    target_cost: f64,
}

impl<E: Estimator> AllocationProblem<'_, E> {
    /// `[Nhf, r_1, …]` at the scaled counts `y`.
    fn allocation_vector<T: Scalar<Float = f64>>(&self, y: &[T]) -> Vec<T> {
        let nhf = y[0] * T::from_f(self.scale[0]);
        std::iter::once(nhf)
            .chain(
                y[1..]
                    .iter()
                    .zip(&self.scale[1..])
                    .map(|(&yi, &s)| yi * T::from_f(s) / nhf),
            )
            .collect()
    }

    /// `c_i · scale_i / target`.
    fn budget_row(&self) -> Vec<f64> {
        self.estimator
            .costs()
            .iter()
            .zip(&self.scale)
            .map(|(c, s)| c * s / self.target_cost)
            .collect()
    }
}

impl<E: Estimator> Objective<f64> for AllocationProblem<'_, E> {
    fn dim(&self) -> usize {
        self.scale.len()
    }

    fn eval_grad(&mut self, y: &[f64]) -> (f64, Vec<f64>) {
        let value = match self.estimator.objective(&self.allocation_vector(y)) {
            Ok(value) => value,
            Err(_) => return (f64::NAN, vec![f64::NAN; y.len()]),
        };
        let (_, grad) = gradient(
            |yd: &[Dual<f64>]| {
                self.estimator
                    .log_variance(&self.allocation_vector(yd))
                    .unwrap_or_else(|_| Dual::constant(f64::NAN))
            },
            y,
        );
        (value, grad)
    }
}

impl<E: Estimator> ConstrainedObjective<f64> for AllocationProblem<'_, E> {
    fn num_equalities(&self) -> usize {
        1
    }

    fn equalities(&mut self, y: &[f64]) -> Vec<f64> {
        let spent: f64 = self.budget_row().iter().zip(y).map(|(a, y)| a * y).sum();
        vec![1.0 - spent]
    }

    fn equality_jacobian(&mut self, _y: &[f64]) -> Vec<Vec<f64>> {
        vec![self.budget_row().into_iter().map(|a| -a).collect()]
    }
}

/// Sample counts strictly inside the feasible set of [`allocation_bounds`], built
/// from an allocation `[Nhf, r_1, …]`.
fn interior_counts(x: &[f64], references: &[usize], ordered: bool) -> Vec<f64> {
    let mut counts = Vec::with_capacity(x.len());
    counts.push(x[0].max(1.0) * (1.0 + INTERIOR_MARGIN));
    for (i, (&r, &reference)) in x[1..].iter().zip(references).enumerate() {
        let mut floor = counts[reference];
        if ordered {
            floor = floor.max(counts[i]);
        }
        let n = (r * counts[0]).max(floor) * (1.0 + INTERIOR_MARGIN);
        counts.push(n);
    }
    counts
}

/// Linear constraints on the scaled counts: `N_0 >= 1`, `N_i >= (1 + δ) N_ref(i)`
/// and, when `ordered`, `N_i >= N_{i−1}`.
fn allocation_bounds(
    scale: &[f64],
    references: &[usize],
    ordered: bool,
) -> LinearInequalities<f64> {
    let n = scale.len();
    let mut ineq = LinearInequalities::new(n);
    let mut row = vec![0.0; n];
    row[0] = scale[0];
    ineq.push(row, 1.0);

    for (i, &reference) in (1..n).zip(references) {
        let mut row = vec![0.0; n];
        row[i] = scale[i];
        row[reference] -= (1.0 + RATIO_MARGIN) * scale[reference];
        ineq.push(row, 0.0);
    }
    if ordered {
        for i in 2..n {
            // Implied by the reference row.
            if references[i - 1] == i - 1 {
                continue;
            }
            let mut row = vec![0.0; n];
            row[i] = scale[i];
            row[i - 1] = -scale[i - 1];
            ineq.push(row, 0.0);
        }
    }
    ineq
}

/// Give one more sample to every model that rounding left with exactly as many
/// samples as its reference model, keeping the ratios ordered when required.
fn separate_tied_models<E: Estimator>(estimator: &E, nhf: f64, ratios: &mut [f64]) {
    let references = estimator.reference_models();
    let ordered = estimator.requires_ordered_ratios();
    for i in 0..ratios.len() {
        let reference = references[i];
        let reference_ratio = if reference == 0 { 1.0 } else { ratios[reference - 1] };
        if (ratios[i] - reference_ratio) * nhf >= 0.5 {
            continue;
        }
        warn!(
            "{}: rounding gives model {} as many samples as model {reference}; adding one",
            estimator.name(),
            i + 1
        );
        ratios[i] = reference_ratio + 1.0 / nhf;
        if ordered {
            for j in (i + 1)..ratios.len() {
                ratios[j] = ratios[j].max(ratios[i]);
            }
        }
    }
}

/// Numerically optimal allocation of `estimator` for `target_cost`.
///
/// `initial_guess` is `[Nhf, r_1, …]`; by default the standardized MLMC allocation
/// is used. The optimizer works on the sample counts `N_i = r_i Nhf`, where the
/// budget is linear, and keeps every `N_i` a relative [`RATIO_MARGIN`] above the
/// count of its reference model. The returned variance is evaluated at the
/// (optionally standardized) allocation.
pub fn allocate_samples_acv<E: Estimator>(
    estimator: &E,
    target_cost: f64,
    initial_guess: Option<&[f64]>,
    config: &AllocationConfig,
) -> Result<Allocation> {
    validate_budget(target_cost)?;
    let n = estimator.nmodels();
    let cov = estimator.covariance();
    let costs = estimator.costs();
    let ordered = estimator.requires_ordered_ratios();
    let references = estimator.reference_models();

    let guess = match initial_guess {
        Some(x) => {
            check_len("initial guess", n, x.len())?;
            if x.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                return Err(AcvError::ratios(format!(
                    "initial guess must be positive, got {x:?}"
                )));
            }
            x.to_vec()
        }
        None => {
            let mlmc = allocate_samples_mlmc(cov, costs, target_cost, true)?;
            std::iter::once(mlmc.nhf_samples).chain(mlmc.ratios).collect()
        }
    };
    let scale = interior_counts(&guess, &references, ordered);
    debug!("{}: initial sample counts {scale:?}", estimator.name());

    let ineq = allocation_bounds(&scale, &references, ordered);
    let mut problem = AllocationProblem {
        estimator,
        scale,
        target_cost,
    };
    let y0 = vec![1.0; n];
    let result = match config.method {
        OptimMethod::Sqp => sqp(&mut problem, &y0, &ineq, &config.sqp),
        OptimMethod::TrustRegion => trust_constr(&mut problem, &y0, &ineq, &config.trust_region),
    };
    if !result.is_success() {
        return Err(AcvError::OptimizerFailed {
            method: config.method,
            reason: result.termination,
        });
    }
    debug!(
        "{}: {} stopped after {} iterations ({})",
        estimator.name(),
        config.method,
        result.iterations,
        result.termination
    );

    let x = problem.allocation_vector(&result.x);
    let mut nhf = x[0];
    let mut ratios = x[1..].to_vec();
    if config.standardize {
        (nhf, ratios) = standardize_sample_ratios(nhf, &ratios);
        separate_tied_models(estimator, nhf, &mut ratios);
    }
    let allocation_vector: Vec<f64> = std::iter::once(nhf).chain(ratios.iter().copied()).collect();
    let log10_variance = estimator.objective(&allocation_vector)?;
    info!(
        "{}: Nhf = {nhf}, ratios = {ratios:?}, log10 variance = {log10_variance:.4}",
        estimator.name()
    );
    Ok(Allocation {
        nhf_samples: nhf,
        ratios,
        log10_variance,
    })
}

/// Search every partition `1 <= L <= K <= n − 1` of ACV-KL together with the ACV-MF
/// baseline, and keep the lowest variance whose rounded cost stays within
/// `config.cost_slack` of the budget.
///
/// A configuration whose optimization fails is skipped with a warning. The search
/// fails only when no configuration yields an allocation, with the last error seen.
pub fn allocate_samples_acv_best_kl(
    cov: &Covariance,
    costs: &[f64],
    target_cost: f64,
    config: &AllocationConfig,
) -> Result<KlAllocation> {
    validate_budget(target_cost)?;
    let n = cov.nmodels();
    let candidates: Vec<Option<(usize, usize)>> = std::iter::once(None)
        .chain((1..n).flat_map(|k| (1..=k).map(move |l| Some((k, l)))))
        .collect();
    let solve = |candidate: &Option<(usize, usize)>| -> Result<Allocation> {
        let estimator = match *candidate {
            None => Acv::mf(cov.clone(), costs.to_vec())?,
            Some((k, l)) => Acv::kl(cov.clone(), costs.to_vec(), k, l)?,
        };
        allocate_samples_acv(&estimator, target_cost, None, config)
    };

    #[cfg(feature = "parallel")]
    let results: Vec<Result<Allocation>> = candidates.par_iter().map(solve).collect();
    #[cfg(not(feature = "parallel"))]
    let results: Vec<Result<Allocation>> = candidates.iter().map(solve).collect();

    let mut best: Option<KlAllocation> = None;
    let mut last_error = None;
    for (candidate, result) in candidates.iter().zip(results) {
        let name = match candidate {
            None => DiscrepancyStrategy::Nested.to_string(),
            Some((k, l)) => DiscrepancyStrategy::Partitioned { k: *k, l: *l }.to_string(),
        };
        let allocation = match result {
            Ok(allocation) => allocation,
            Err(e) => {
                warn!("{name}: {e}; skipped");
                last_error = Some(e);
                continue;
            }
        };
        let cost = allocation.cost(costs);
        debug!(
            "{name}: log10 variance {:.4}, cost {cost}",
            allocation.log10_variance
        );
        if cost > target_cost + config.cost_slack {
            warn!("{name} costs {cost}, over the budget {target_cost}; skipped");
            continue;
        }
        let improves = best
            .as_ref()
            .map_or(true, |b| allocation.log10_variance < b.allocation.log10_variance);
        if improves {
            best = Some(KlAllocation {
                allocation,
                k: candidate.map(|(k, _)| k),
                l: candidate.map(|(_, l)| l),
            });
        }
    }

    match (best, last_error) {
        (Some(best), _) => {
            info!("best ACV-KL configuration: K = {:?}, L = {:?}", best.k, best.l);
            Ok(best)
        }
        (None, Some(e)) => Err(e),
        // Every configuration converged but rounded above the allowed cost.
        (None, None) => Err(AcvError::InvalidBudget {
            target: target_cost,
        }),
    }
}
