//! Multi-fidelity estimators and the allocation objective derived from them.
//!
//! An estimator only has to say how its variance shrinks with the sample ratios
//! ([`Estimator::variance_reduction`]). Everything the allocation optimizer needs,
//! the objective `log10 Var` and its exact gradient, is derived from that single
//! formula by evaluating it with [`Dual`] numbers.

use log::trace;

use crate::api::gradient;
use crate::covariance::{validate_costs, Covariance};
use crate::discrepancy::DiscrepancyStrategy;
use crate::dual::Dual;
use crate::error::{check_len, AcvError, Result};
use crate::scalar::Scalar;
use crate::variance::{
    check_mfmc_model_ordering, rsquared_acv_nondegenerate, rsquared_mfmc, rsquared_mlmc,
};

/// A multi-fidelity Monte Carlo estimator of the high-fidelity mean.
///
/// Allocation vectors are `x = [Nhf, r_1, …, r_{n−1}]`.
pub trait Estimator: Sync {
    /// Short human-readable name used in log messages.
    fn name(&self) -> String;

    /// Covariance between the models, high-fidelity first.
    fn covariance(&self) -> &Covariance;

    /// Cost of one evaluation of each model.
    fn costs(&self) -> &[f64];

    /// `γ(r)`: estimator variance divided by the variance of plain Monte Carlo with
    /// `Nhf` high-fidelity samples.
    fn variance_reduction<T: Scalar<Float = f64>>(&self, ratios: &[T]) -> Result<T>;

    /// Number of models including the high-fidelity one.
    fn nmodels(&self) -> usize {
        self.covariance().nmodels()
    }

    /// Whether the ratios must be non-decreasing (`r_1 <= r_2 <= …`) for the sample
    /// sets to be realisable.
    fn requires_ordered_ratios(&self) -> bool {
        false
    }

    /// For each low-fidelity model `i = 1, …, n − 1`, the model whose sample count
    /// `N_i` has to exceed for the control variate of `i` to carry information
    /// (`0` is the high-fidelity model).
    fn reference_models(&self) -> Vec<usize> {
        vec![0; self.nmodels() - 1]
    }

    /// `log10(γ(r) · cov[0,0] / Nhf)`.
    fn log_variance<T: Scalar<Float = f64>>(&self, x: &[T]) -> Result<T> {
        check_len("allocation vector", self.nmodels(), x.len())?;
        let gamma = self.variance_reduction(&x[1..])?;
        Ok((gamma * T::from_f(self.covariance().hf_variance()) / x[0]).log10())
    }

    fn objective(&self, x: &[f64]) -> Result<f64> {
        self.log_variance(x)
    }

    /// Objective value and its exact gradient with respect to `x`.
    fn objective_and_jacobian(&self, x: &[f64]) -> Result<(f64, Vec<f64>)> {
        // Failures depend only on shapes, so a successful plain evaluation means the
        // dual evaluations cannot fail either.
        self.objective(x)?;
        Ok(gradient(
            |xd: &[Dual<f64>]| {
                self.log_variance(xd)
                    .unwrap_or_else(|_| Dual::constant(f64::NAN))
            },
            x,
        ))
    }

    fn jacobian(&self, x: &[f64]) -> Result<Vec<f64>> {
        Ok(self.objective_and_jacobian(x)?.1)
    }

    /// `log10 γ(r)`, the objective when `Nhf` is held fixed.
    fn ratio_objective(&self, ratios: &[f64]) -> Result<f64> {
        Ok(self.variance_reduction(ratios)?.log10())
    }

    fn ratio_jacobian(&self, ratios: &[f64]) -> Result<Vec<f64>> {
        self.ratio_objective(ratios)?;
        Ok(gradient(
            |rd: &[Dual<f64>]| {
                self.variance_reduction(rd)
                    .map(Dual::log10)
                    .unwrap_or_else(|_| Dual::constant(f64::NAN))
            },
            ratios,
        )
        .1)
    }

    /// `Nhf · (c_0 + Σ c_i r_i)`.
    fn total_cost<T: Scalar<Float = f64>>(&self, x: &[T]) -> Result<T> {
        check_len("allocation vector", self.nmodels(), x.len())?;
        let costs = self.costs();
        let per_hf = x[1..]
            .iter()
            .zip(&costs[1..])
            .fold(T::from_f(costs[0]), |acc, (&r, &c)| acc + r * T::from_f(c));
        Ok(x[0] * per_hf)
    }

    /// `λ · Var(x) + cost(x)`, the Lagrangian of minimizing cost at fixed variance.
    fn lagrangian<T: Scalar<Float = f64>>(&self, x: &[T], multiplier: T) -> Result<T> {
        check_len("allocation vector", self.nmodels(), x.len())?;
        let gamma = self.variance_reduction(&x[1..])?;
        let variance = gamma * T::from_f(self.covariance().hf_variance()) / x[0];
        Ok(multiplier * variance + self.total_cost(x)?)
    }
}

/// Approximate control variate estimator with a configurable sampling strategy.
#[derive(Debug, Clone)]
pub struct Acv {
    cov: Covariance,
    costs: Vec<f64>,
    strategy: DiscrepancyStrategy,
}

impl Acv {
    pub fn new(cov: Covariance, costs: Vec<f64>, strategy: DiscrepancyStrategy) -> Result<Self> {
        validate_costs(&costs, cov.nmodels())?;
        strategy.validate(cov.nmodels())?;
        Ok(Acv {
            cov,
            costs,
            strategy,
        })
    }

    /// ACV-MF (nested sample sets).
    pub fn mf(cov: Covariance, costs: Vec<f64>) -> Result<Self> {
        Acv::new(cov, costs, DiscrepancyStrategy::Nested)
    }

    /// ACV-IS (independent extra samples).
    pub fn is(cov: Covariance, costs: Vec<f64>) -> Result<Self> {
        Acv::new(cov, costs, DiscrepancyStrategy::IndependentSampling)
    }

    /// ACV-KL with `1 <= l <= k <= n − 1`.
    pub fn kl(cov: Covariance, costs: Vec<f64>, k: usize, l: usize) -> Result<Self> {
        Acv::new(cov, costs, DiscrepancyStrategy::Partitioned { k, l })
    }

    /// How the sample sets of this estimator overlap.
    pub fn strategy(&self) -> DiscrepancyStrategy {
        self.strategy
    }
}

impl Estimator for Acv {
    fn name(&self) -> String {
        self.strategy.to_string()
    }

    fn covariance(&self) -> &Covariance {
        &self.cov
    }

    fn costs(&self) -> &[f64] {
        &self.costs
    }

    /// Control variates without samples of their own are left out (see
    /// [`rsquared_acv_nondegenerate`]). A discrepancy covariance that is singular
    /// for any other reason means the control variates add nothing, so `γ = 1`.
    fn variance_reduction<T: Scalar<Float = f64>>(&self, ratios: &[T]) -> Result<T> {
        match rsquared_acv_nondegenerate(&self.cov, ratios, self.strategy) {
            Ok(r2) => Ok(T::one() - r2),
            Err(AcvError::SingularMatrix { .. }) => {
                trace!("{}: no variance reduction at singular ratios", self.strategy);
                Ok(T::one())
            }
            Err(e) => Err(e),
        }
    }

    fn requires_ordered_ratios(&self) -> bool {
        matches!(self.strategy, DiscrepancyStrategy::Partitioned { .. })
    }

    /// Partitioned control variates past `K` are compared against the samples of
    /// model `L`.
    fn reference_models(&self) -> Vec<usize> {
        match self.strategy {
            DiscrepancyStrategy::Partitioned { k, l } => (1..self.nmodels())
                .map(|i| if i <= k { 0 } else { l })
                .collect(),
            _ => vec![0; self.nmodels() - 1],
        }
    }
}

/// Multifidelity Monte Carlo estimator.
#[derive(Debug, Clone)]
pub struct Mfmc {
    cov: Covariance,
    costs: Vec<f64>,
}

impl Mfmc {
    /// Fails unless the low-fidelity models are ordered by decreasing correlation
    /// with the high-fidelity model.
    pub fn new(cov: Covariance, costs: Vec<f64>) -> Result<Self> {
        validate_costs(&costs, cov.nmodels())?;
        check_mfmc_model_ordering(&cov)?;
        Ok(Mfmc { cov, costs })
    }
}

impl Estimator for Mfmc {
    fn name(&self) -> String {
        "MFMC".to_string()
    }

    fn covariance(&self) -> &Covariance {
        &self.cov
    }

    fn costs(&self) -> &[f64] {
        &self.costs
    }

    fn variance_reduction<T: Scalar<Float = f64>>(&self, ratios: &[T]) -> Result<T> {
        Ok(T::one() - rsquared_mfmc(&self.cov, ratios)?)
    }

    fn requires_ordered_ratios(&self) -> bool {
        true
    }
}

/// Multilevel Monte Carlo estimator.
#[derive(Debug, Clone)]
pub struct Mlmc {
    cov: Covariance,
    costs: Vec<f64>,
}

impl Mlmc {
    pub fn new(cov: Covariance, costs: Vec<f64>) -> Result<Self> {
        validate_costs(&costs, cov.nmodels())?;
        Ok(Mlmc { cov, costs })
    }
}

impl Estimator for Mlmc {
    fn name(&self) -> String {
        "MLMC".to_string()
    }

    fn covariance(&self) -> &Covariance {
        &self.cov
    }

    fn costs(&self) -> &[f64] {
        &self.costs
    }

    fn variance_reduction<T: Scalar<Float = f64>>(&self, ratios: &[T]) -> Result<T> {
        Ok(T::one() - rsquared_mlmc(&self.cov, ratios)?)
    }

    fn requires_ordered_ratios(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cov3() -> Covariance {
        Covariance::from_rows(&[
            vec![1.0, 0.5, 0.25],
            vec![0.5, 1.0, 0.5],
            vec![0.25, 0.5, 4.0],
        ])
        .unwrap()
    }

    #[test]
    fn mlmc_log_variance_at_optimum() {
        let est = Mlmc::new(cov3(), vec![6.0, 3.0, 1.0]).unwrap();
        let v = est.objective(&[3.0, 4.0, 9.0]).unwrap();
        assert_relative_eq!(v, 0.0, epsilon = 1e-12);
        assert_relative_eq!(est.total_cost(&[3.0, 4.0, 9.0]).unwrap(), 81.0);
    }

    #[test]
    fn jacobian_wrt_nhf() {
        // ∂/∂Nhf log10(γ c00 / Nhf) = −1 / (Nhf ln 10)
        let est = Acv::mf(cov3(), vec![6.0, 3.0, 1.0]).unwrap();
        let g = est.jacobian(&[3.0, 4.0, 9.0]).unwrap();
        assert_relative_eq!(g[0], -1.0 / (3.0 * std::f64::consts::LN_10), max_relative = 1e-12);
    }

    #[test]
    fn singular_acv_has_no_reduction() {
        let cov = Covariance::from_rows(&[vec![1.0, 0.9], vec![0.9, 1.0]]).unwrap();
        let est = Acv::is(cov, vec![1.0, 0.1]).unwrap();
        assert_eq!(est.variance_reduction(&[1.0]).unwrap(), 1.0);
    }

    #[test]
    fn tied_partition_keeps_remaining_control_variates() {
        let cov = Covariance::from_rows(&[
            vec![1.0, 0.9, 0.8, 0.7],
            vec![0.9, 1.0, 0.85, 0.75],
            vec![0.8, 0.85, 1.0, 0.8],
            vec![0.7, 0.75, 0.8, 1.0],
        ])
        .unwrap();
        let est = Acv::kl(cov, vec![1.0, 0.1, 0.05, 0.01], 1, 1).unwrap();
        assert_eq!(est.reference_models(), vec![0, 1, 1]);
        let tied = est.variance_reduction(&[3.0, 3.0, 16.0]).unwrap();
        let apart = est.variance_reduction(&[3.0, 4.0, 16.0]).unwrap();
        assert!(tied < 1.0);
        assert!(apart <= tied);
    }

    #[test]
    fn construction_checks() {
        assert!(Acv::mf(cov3(), vec![1.0, 1.0]).is_err());
        assert!(Acv::kl(cov3(), vec![1.0, 1.0, 1.0], 3, 1).is_err());
        assert!(Acv::kl(cov3(), vec![1.0, 1.0, 1.0], 2, 2).is_ok());
        let unordered = Covariance::from_rows(&[
            vec![1.0, 0.2, 0.5],
            vec![0.2, 1.0, 0.1],
            vec![0.5, 0.1, 1.0],
        ])
        .unwrap();
        assert!(matches!(
            Mfmc::new(unordered, vec![1.0, 0.1, 0.01]),
            Err(AcvError::ModelOrdering { model: 2 })
        ));
    }

    #[test]
    fn wrong_allocation_length() {
        let est = Mlmc::new(cov3(), vec![6.0, 3.0, 1.0]).unwrap();
        assert!(est.objective(&[3.0, 4.0]).is_err());
        assert!(est.jacobian(&[3.0, 4.0]).is_err());
    }

    #[test]
    fn ordering_requirement() {
        let costs = vec![6.0, 3.0, 1.0];
        assert!(!Acv::mf(cov3(), costs.clone()).unwrap().requires_ordered_ratios());
        assert!(Acv::kl(cov3(), costs.clone(), 2, 1)
            .unwrap()
            .requires_ordered_ratios());
        assert!(Mlmc::new(cov3(), costs).unwrap().requires_ordered_ratios());
    }
}
