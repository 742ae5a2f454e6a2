//! Discrepancy covariances of the approximate control variate sampling strategies.
//!
//! A strategy decides how the sample sets of the low-fidelity models overlap with
//! each other and with the high-fidelity samples. Its effect on the estimator
//! variance is captured by a matrix `F(r)`; the covariances that enter the
//! control-variate solve are then
//!
//! ```text
//! CF = cov[1.., 1..] ∘ F        cf = diag(F) ∘ cov[1.., 0]
//! ```
//!
//! Every formula is generic over [`Scalar`] so the same code yields values and exact
//! derivatives with respect to the ratios.

use crate::covariance::Covariance;
use crate::error::{check_len, AcvError, Result};
use crate::scalar::Scalar;

/// Regulariser added to ratio denominators in the partitioned strategy.
const KL_EPS: f64 = 1e-20;

/// Discrepancy covariances `(CF, cf)` for a set of sample ratios.
#[derive(Debug, Clone, PartialEq)]
pub struct Discrepancy<T> {
    /// `(n − 1) × (n − 1)` covariance among the discrepancies, symmetric.
    pub cf_matrix: Vec<Vec<T>>,
    /// Covariance of each discrepancy with the high-fidelity model.
    pub cf_vector: Vec<T>,
}

/// How the sample sets of an ACV estimator are shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiscrepancyStrategy {
    /// ACV-IS: each low-fidelity model gets its own independent extra samples on top
    /// of the shared high-fidelity samples.
    IndependentSampling,
    /// ACV-MF: the sample sets are nested, every model reusing the samples of the
    /// models before it.
    Nested,
    /// ACV-KL: the first `k` control variates share the high-fidelity samples, the
    /// rest share the samples of model `l`. Both are 1-based counts.
    Partitioned { k: usize, l: usize },
}

impl DiscrepancyStrategy {
    /// Discrepancy covariances of this strategy at `ratios`.
    pub fn covariances<T: Scalar<Float = f64>>(
        &self,
        cov: &Covariance,
        ratios: &[T],
    ) -> Result<Discrepancy<T>> {
        match *self {
            DiscrepancyStrategy::IndependentSampling => discrepancy_covariances_is(cov, ratios),
            DiscrepancyStrategy::Nested => discrepancy_covariances_mf(cov, ratios),
            DiscrepancyStrategy::Partitioned { k, l } => {
                discrepancy_covariances_kl(cov, ratios, k, l)
            }
        }
    }

    /// Check `1 <= l <= k <= nmodels - 1` for the partitioned strategy.
    pub fn validate(&self, nmodels: usize) -> Result<()> {
        match *self {
            DiscrepancyStrategy::Partitioned { k, l } => validate_partition(k, l, nmodels),
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for DiscrepancyStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscrepancyStrategy::IndependentSampling => write!(f, "ACV-IS"),
            DiscrepancyStrategy::Nested => write!(f, "ACV-MF"),
            DiscrepancyStrategy::Partitioned { k, l } => write!(f, "ACV-KL({k},{l})"),
        }
    }
}

/// Independent-sampling strategy: `F_ii = (r_i − 1)/r_i`,
/// `F_ij = F_ii · F_jj`.
pub fn discrepancy_covariances_is<T: Scalar<Float = f64>>(
    cov: &Covariance,
    ratios: &[T],
) -> Result<Discrepancy<T>> {
    check_len("sample ratios", cov.nmodels() - 1, ratios.len())?;
    let diag: Vec<T> = ratios.iter().map(|&r| (r - T::one()) / r).collect();
    let m = ratios.len();
    let f = (0..m)
        .map(|i| {
            (0..m)
                .map(|j| if i == j { diag[i] } else { diag[i] * diag[j] })
                .collect()
        })
        .collect();
    Ok(assemble(cov, f))
}

/// Nested (MFMC-like) strategy: `F_ij = (min(r_i, r_j) − 1) / min(r_i, r_j)`.
pub fn discrepancy_covariances_mf<T: Scalar<Float = f64>>(
    cov: &Covariance,
    ratios: &[T],
) -> Result<Discrepancy<T>> {
    check_len("sample ratios", cov.nmodels() - 1, ratios.len())?;
    let f = ratios
        .iter()
        .map(|&ri| {
            ratios
                .iter()
                .map(|&rj| {
                    let r = ri.min(rj);
                    (r - T::one()) / r
                })
                .collect()
        })
        .collect();
    Ok(assemble(cov, f))
}

/// Partitioned strategy with `k` control variates on the high-fidelity samples and
/// the others sharing the samples of model `l`.
pub fn discrepancy_covariances_kl<T: Scalar<Float = f64>>(
    cov: &Covariance,
    ratios: &[T],
    k: usize,
    l: usize,
) -> Result<Discrepancy<T>> {
    let nmodels = cov.nmodels();
    validate_partition(k, l, nmodels)?;
    check_len("sample ratios", nmodels - 1, ratios.len())?;

    let kk = k - 1;
    let ll = l - 1;
    let eps = T::from_f(KL_EPS);
    let one = T::one();
    let rl = ratios[ll];
    let m = ratios.len();

    let mut f = vec![vec![T::zero(); m]; m];
    for i in 0..m {
        let ri = ratios[i];
        f[i][i] = if i <= kk {
            (ri - one) / (ri + eps)
        } else {
            (ri - rl) / (ri * rl)
        };
        for j in (i + 1)..m {
            let rj = ratios[j];
            let v = if i <= kk && j <= kk {
                let r = ri.min(rj);
                (r - one) / (r + eps)
            } else if i > kk && j > kk {
                let t1 = (ri - rl) * (rj - rl) / (ri * rj * rl + eps);
                let t2 = (ri.min(rj) - rl) / (ri * rj + eps);
                t1 + t2
            } else if i > ll && i <= kk && j > kk {
                (ri - rl) / (ri * rl + eps)
            } else if j > ll && j <= kk && i > kk {
                (rj - rl) / (rj * rl + eps)
            } else {
                T::zero()
            };
            f[i][j] = v;
            f[j][i] = v;
        }
    }
    Ok(assemble(cov, f))
}

fn validate_partition(k: usize, l: usize, nmodels: usize) -> Result<()> {
    if l >= 1 && l <= k && k < nmodels {
        Ok(())
    } else {
        Err(AcvError::InvalidPartition { k, l, nmodels })
    }
}

fn assemble<T: Scalar<Float = f64>>(cov: &Covariance, f: Vec<Vec<T>>) -> Discrepancy<T> {
    let cf_vector = (0..f.len())
        .map(|i| f[i][i] * T::from_f(cov[(i + 1, 0)]))
        .collect();
    let cf_matrix = f
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            row.into_iter()
                .enumerate()
                .map(|(j, fij)| T::from_f(cov[(i + 1, j + 1)]) * fij)
                .collect()
        })
        .collect();
    Discrepancy {
        cf_matrix,
        cf_vector,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dual;
    use approx::assert_relative_eq;

    fn cov4() -> Covariance {
        Covariance::from_rows(&[
            vec![1.0, 0.9, 0.8, 0.7],
            vec![0.9, 1.0, 0.85, 0.75],
            vec![0.8, 0.85, 1.0, 0.8],
            vec![0.7, 0.75, 0.8, 1.0],
        ])
        .unwrap()
    }

    fn assert_symmetric(d: &Discrepancy<f64>) {
        for (i, row) in d.cf_matrix.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                assert_eq!(*v, d.cf_matrix[j][i]);
            }
        }
    }

    #[test]
    fn every_strategy_is_symmetric() {
        let cov = cov4();
        let r = [2.0, 4.0, 8.0];
        assert_symmetric(&discrepancy_covariances_is(&cov, &r).unwrap());
        assert_symmetric(&discrepancy_covariances_mf(&cov, &r).unwrap());
        for k in 1..4 {
            for l in 1..=k {
                assert_symmetric(&discrepancy_covariances_kl(&cov, &r, k, l).unwrap());
            }
        }
    }

    #[test]
    fn independent_sampling_entries() {
        let cov = cov4();
        let d = discrepancy_covariances_is(&cov, &[2.0, 4.0, 5.0]).unwrap();
        // F_00 = 1/2, F_11 = 3/4
        assert_relative_eq!(d.cf_vector[0], 0.5 * 0.9);
        assert_relative_eq!(d.cf_vector[1], 0.75 * 0.8);
        assert_relative_eq!(d.cf_matrix[0][1], 0.85 * 0.5 * 0.75);
        assert_relative_eq!(d.cf_matrix[2][2], 0.8);
    }

    #[test]
    fn nested_uses_smaller_ratio() {
        let cov = cov4();
        let d = discrepancy_covariances_mf(&cov, &[2.0, 4.0, 5.0]).unwrap();
        assert_relative_eq!(d.cf_matrix[0][2], 0.75 * 0.5);
        assert_relative_eq!(d.cf_matrix[1][2], 0.8 * 0.75);
    }

    #[test]
    fn kl_one_one_matches_nested_head() {
        // With K = L = 1 the first control variate behaves like the nested strategy.
        let cov = cov4();
        let r = [2.0, 4.0, 5.0];
        let kl = discrepancy_covariances_kl(&cov, &r, 1, 1).unwrap();
        let mf = discrepancy_covariances_mf(&cov, &r).unwrap();
        assert_relative_eq!(kl.cf_vector[0], mf.cf_vector[0], max_relative = 1e-12);
        assert_relative_eq!(kl.cf_matrix[0][0], mf.cf_matrix[0][0], max_relative = 1e-12);
    }

    #[test]
    fn kl_diagonal_beyond_k() {
        let cov = cov4();
        let r = [2.0, 4.0, 5.0];
        let d = discrepancy_covariances_kl(&cov, &r, 1, 1).unwrap();
        // (r_i − r_L) / (r_i r_L)
        assert_relative_eq!(d.cf_matrix[1][1], (4.0 - 2.0) / 8.0);
        assert_relative_eq!(d.cf_vector[2], (5.0 - 2.0) / 10.0 * 0.7);
    }

    #[test]
    fn invalid_partition() {
        let cov = cov4();
        let r = [2.0, 4.0, 5.0];
        assert!(matches!(
            discrepancy_covariances_kl(&cov, &r, 4, 1),
            Err(AcvError::InvalidPartition { .. })
        ));
        assert!(discrepancy_covariances_kl(&cov, &r, 1, 2).is_err());
        assert!(discrepancy_covariances_kl(&cov, &r, 1, 0).is_err());
    }

    #[test]
    fn wrong_ratio_count() {
        assert!(matches!(
            discrepancy_covariances_is(&cov4(), &[2.0]),
            Err(AcvError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn dual_carries_derivative() {
        let cov = cov4();
        let r = [Dual::variable(2.0), Dual::constant(4.0), Dual::constant(5.0)];
        let d = discrepancy_covariances_is(&cov, &r).unwrap();
        // d/dr (r − 1)/r = 1/r² = 1/4
        assert_relative_eq!(d.cf_vector[0].eps, 0.25 * 0.9);
        assert_eq!(d.cf_vector[1].eps, 0.0);
    }
}
