//! Variance-reduction models.
//!
//! Each model returns the squared correlation `r²` between the high-fidelity
//! Monte Carlo estimator and the control-variate correction. The variance of the
//! estimator relative to plain Monte Carlo with the same high-fidelity samples is
//! `γ = 1 − r²`.

use log::trace;

use crate::covariance::Covariance;
use crate::discrepancy::{Discrepancy, DiscrepancyStrategy};
use crate::error::{check_len, AcvError, Result};
use crate::linalg::{dot, lu_solve};
use crate::scalar::Scalar;

/// Which closed-form or generic variance model to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarianceModel {
    /// Optimal control variate with known low-fidelity means. Takes no ratios.
    ControlVariate,
    /// Multifidelity Monte Carlo.
    Mfmc,
    /// Multilevel Monte Carlo.
    Mlmc,
    /// Approximate control variate with the given sampling strategy.
    Acv(DiscrepancyStrategy),
}

impl VarianceModel {
    /// `r²` of this model. `ratios` must be `None` for
    /// [`VarianceModel::ControlVariate`] and `Some` with `n − 1` entries otherwise.
    pub fn rsquared<T: Scalar<Float = f64>>(
        &self,
        cov: &Covariance,
        ratios: Option<&[T]>,
    ) -> Result<T> {
        match (self, ratios) {
            (VarianceModel::ControlVariate, None) => rsquared_control_variate(cov).map(T::from_f),
            (VarianceModel::ControlVariate, Some(_)) => Err(AcvError::UnexpectedRatios),
            (_, None) => Err(AcvError::MissingRatios),
            (VarianceModel::Mfmc, Some(r)) => {
                check_mfmc_model_ordering(cov)?;
                rsquared_mfmc(cov, r)
            }
            (VarianceModel::Mlmc, Some(r)) => rsquared_mlmc(cov, r),
            (VarianceModel::Acv(strategy), Some(r)) => rsquared_acv(cov, r, *strategy),
        }
    }

    /// `γ = 1 − r²`.
    pub fn variance_reduction<T: Scalar<Float = f64>>(
        &self,
        cov: &Covariance,
        ratios: Option<&[T]>,
    ) -> Result<T> {
        Ok(T::one() - self.rsquared(cov, ratios)?)
    }
}

/// `r²` of the optimal control variate: `cov[0,1:] · cov[1:,1:]⁻¹ · cov[1:,0] / cov[0,0]`.
pub fn rsquared_control_variate(cov: &Covariance) -> Result<f64> {
    let n = cov.nmodels();
    let a: Vec<Vec<f64>> = (1..n)
        .map(|i| (1..n).map(|j| cov[(i, j)]).collect())
        .collect();
    let c: Vec<f64> = (1..n).map(|i| cov[(i, 0)]).collect();
    let x = lu_solve(&a, &c).ok_or(AcvError::SingularMatrix {
        context: "low-fidelity covariance",
    })?;
    Ok(dot(&c, &x) / cov.hf_variance())
}

/// Closed-form `r²` of MFMC.
///
/// Assumes the models are ordered by decreasing correlation with the high-fidelity
/// model; see [`check_mfmc_model_ordering`].
pub fn rsquared_mfmc<T: Scalar<Float = f64>>(cov: &Covariance, ratios: &[T]) -> Result<T> {
    let n = cov.nmodels();
    check_len("sample ratios", n - 1, ratios.len())?;
    let c00 = cov.hf_variance();
    let rho2 = |i: usize| T::from_f(cov[(0, i)] * cov[(0, i)] / (c00 * cov[(i, i)]));

    let r0 = ratios[0];
    let mut rsquared = (r0 - T::one()) / r0 * rho2(1);
    for i in 1..(n - 1) {
        let (cur, prev) = (ratios[i], ratios[i - 1]);
        rsquared += (cur - prev) / (cur * prev) * rho2(i + 1);
    }
    Ok(rsquared)
}

/// Closed-form `r²` of MLMC.
///
/// A NaN result (for example from ratios that leave a level without samples) is
/// reported as [`AcvError::NanVariance`].
pub fn rsquared_mlmc<T: Scalar<Float = f64>>(cov: &Covariance, ratios: &[T]) -> Result<T> {
    let n = cov.nmodels();
    check_len("sample ratios", n - 1, ratios.len())?;

    // Samples per level relative to Nhf.
    let mut level = Vec::with_capacity(n);
    level.push(T::one());
    for i in 1..n {
        let next = ratios[i - 1] - level[i - 1];
        level.push(next);
    }

    let mut gamma = T::zero();
    for i in 0..(n - 1) {
        let var_delta = cov[(i, i)] + cov[(i + 1, i + 1)] - 2.0 * cov[(i, i + 1)];
        gamma += T::from_f(var_delta) / level[i];
    }
    gamma += T::from_f(cov[(n - 1, n - 1)]) / level[n - 1];
    gamma = gamma / T::from_f(cov.hf_variance());

    let rsquared = T::one() - gamma;
    if rsquared.is_nan() {
        return Err(AcvError::NanVariance);
    }
    Ok(rsquared)
}

/// Generic ACV `r² = cfᵀ CF⁻¹ cf / cov[0,0]` for any sampling strategy.
///
/// A singular `CF` is reported as [`AcvError::SingularMatrix`].
pub fn rsquared_acv<T: Scalar<Float = f64>>(
    cov: &Covariance,
    ratios: &[T],
    strategy: DiscrepancyStrategy,
) -> Result<T> {
    let d = strategy.covariances(cov, ratios)?;
    solve_rsquared(cov, &d.cf_matrix, &d.cf_vector).ok_or_else(|| {
        trace!("{strategy}: discrepancy covariance singular at ratios {ratios:?}");
        AcvError::SingularMatrix {
            context: "discrepancy covariance",
        }
    })
}

/// [`rsquared_acv`] without the control variates whose discrepancy vanishes.
///
/// A ratio of one, or a partitioned ratio equal to `r_L`, leaves a control variate
/// with no samples of its own: its entry of `cf` and its row of `CF` are exactly
/// zero. Such variates add nothing to the estimator, and `r²` tends to the value
/// without them as the ratio approaches the tie, so they are removed before the
/// solve instead of making `CF` singular. Derivatives at the tie are those of the
/// reduced estimator.
pub fn rsquared_acv_nondegenerate<T: Scalar<Float = f64>>(
    cov: &Covariance,
    ratios: &[T],
    strategy: DiscrepancyStrategy,
) -> Result<T> {
    let d = strategy.covariances(cov, ratios)?;
    let dropped = degenerate_controls(&d);
    if dropped.is_empty() {
        return rsquared_acv(cov, ratios, strategy);
    }
    trace!("{strategy}: control variates {dropped:?} vanish at ratios {ratios:?}");

    let keep: Vec<usize> = (0..d.cf_vector.len())
        .filter(|i| !dropped.contains(i))
        .collect();
    if keep.is_empty() {
        return Ok(T::zero());
    }
    let cf_matrix: Vec<Vec<T>> = keep
        .iter()
        .map(|&i| keep.iter().map(|&j| d.cf_matrix[i][j]).collect())
        .collect();
    let cf_vector: Vec<T> = keep.iter().map(|&i| d.cf_vector[i]).collect();
    solve_rsquared(cov, &cf_matrix, &cf_vector).ok_or(AcvError::SingularMatrix {
        context: "reduced discrepancy covariance",
    })
}

/// Control variates with a zero entry in `cf` and a zero row in `CF`.
pub fn degenerate_controls<T: Scalar<Float = f64>>(d: &Discrepancy<T>) -> Vec<usize> {
    d.cf_vector
        .iter()
        .zip(&d.cf_matrix)
        .enumerate()
        .filter(|(_, (c, row))| c.value() == 0.0 && row.iter().all(|v| v.value() == 0.0))
        .map(|(i, _)| i)
        .collect()
}

fn solve_rsquared<T: Scalar<Float = f64>>(
    cov: &Covariance,
    cf_matrix: &[Vec<T>],
    cf_vector: &[T],
) -> Option<T> {
    let x = lu_solve(cf_matrix, cf_vector)?;
    Some(dot(cf_vector, &x) / T::from_f(cov.hf_variance()))
}

/// Check that low-fidelity models are ordered by non-increasing `|cov[0, i]|`.
pub fn check_mfmc_model_ordering(cov: &Covariance) -> Result<()> {
    let n = cov.nmodels();
    for i in 2..n {
        if cov[(0, i)].abs() > cov[(0, i - 1)].abs() {
            return Err(AcvError::ModelOrdering { model: i });
        }
    }
    Ok(())
}
