//! Control-variate weights and the resulting mean estimate.

use ndarray::{Array1, Array2, Axis};

use crate::covariance::Covariance;
use crate::discrepancy::DiscrepancyStrategy;
use crate::error::{check_len, AcvError, Result};
use crate::linalg::lu_solve;
use crate::sampling::ValuePair;

/// MLMC weights: every correction enters with weight `−1`.
pub fn mlmc_control_variate_weights(nmodels: usize) -> Vec<f64> {
    vec![-1.0; nmodels.saturating_sub(1)]
}

/// MFMC weights `η_i = −cov[0, i] / cov[i, i]`.
pub fn mfmc_control_variate_weights(cov: &Covariance) -> Vec<f64> {
    (1..cov.nmodels())
        .map(|i| -cov[(0, i)] / cov[(i, i)])
        .collect()
}

/// ACV weights `η = −CF⁻¹ cf` for a sampling strategy at `ratios`.
pub fn acv_control_variate_weights(
    cov: &Covariance,
    ratios: &[f64],
    strategy: DiscrepancyStrategy,
) -> Result<Vec<f64>> {
    let d = strategy.covariances(cov, ratios)?;
    let x = lu_solve(&d.cf_matrix, &d.cf_vector).ok_or(AcvError::SingularMatrix {
        context: "discrepancy covariance",
    })?;
    Ok(x.into_iter().map(|v| -v).collect())
}

/// Control-variate estimate of the high-fidelity mean, one entry per QoI.
///
/// ```text
/// Q = mean(V1_0) + Σ_i w_i (mean(V1_i) − mean(V2_i))
/// ```
///
/// `values[0]` holds the high-fidelity outputs; every other entry must carry both
/// its shared (`V1`) and its own (`V2`) evaluations.
pub fn compute_control_variate_mean_estimate(
    weights: &[f64],
    values: &[ValuePair],
) -> Result<Array1<f64>> {
    check_len("control variate weights", values.len().saturating_sub(1), weights.len())?;
    let first = values
        .first()
        .ok_or_else(|| AcvError::evaluation("no model values supplied"))?;
    let mut estimate = column_mean(&first.shared, 0)?;
    let nqoi = estimate.len();

    for (i, (w, pair)) in weights.iter().zip(&values[1..]).enumerate() {
        let model = i + 1;
        let own = pair.own.as_ref().ok_or_else(|| {
            AcvError::evaluation(format!("model {model} is missing its own-sample values"))
        })?;
        let shared = column_mean(&pair.shared, model)?;
        let own = column_mean(own, model)?;
        if shared.len() != nqoi || own.len() != nqoi {
            return Err(AcvError::evaluation(format!(
                "model {model} returned {} QoI, expected {nqoi}",
                shared.len().max(own.len())
            )));
        }
        estimate.scaled_add(*w, &(shared - own));
    }
    Ok(estimate)
}

fn column_mean(values: &Array2<f64>, model: usize) -> Result<Array1<f64>> {
    values
        .mean_axis(Axis(0))
        .ok_or_else(|| AcvError::evaluation(format!("model {model} has no values")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn mfmc_weights() {
        let cov = Covariance::from_rows(&[vec![1.0, 0.9], vec![0.9, 2.0]]).unwrap();
        assert_eq!(mfmc_control_variate_weights(&cov), vec![-0.45]);
        assert_eq!(mlmc_control_variate_weights(3), vec![-1.0, -1.0]);
    }

    #[test]
    fn two_model_acv_weight_is_mfmc_weight() {
        // For two models the ratio factor cancels: η = −cov01 / cov11.
        let cov = Covariance::from_rows(&[vec![1.0, 0.9], vec![0.9, 2.0]]).unwrap();
        for strategy in [
            DiscrepancyStrategy::IndependentSampling,
            DiscrepancyStrategy::Nested,
            DiscrepancyStrategy::Partitioned { k: 1, l: 1 },
        ] {
            let w = acv_control_variate_weights(&cov, &[5.0], strategy).unwrap();
            assert_relative_eq!(w[0], -0.45, max_relative = 1e-12);
        }
    }

    #[test]
    fn mean_estimate_per_qoi() {
        let values = vec![
            ValuePair {
                shared: array![[1.0, 10.0], [3.0, 30.0]],
                own: None,
            },
            ValuePair {
                shared: array![[2.0, 0.0], [2.0, 0.0]],
                own: Some(array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]]),
            },
        ];
        let q = compute_control_variate_mean_estimate(&[-0.5], &values).unwrap();
        assert_relative_eq!(q[0], 2.0 - 0.5 * (2.0 - 1.0));
        assert_relative_eq!(q[1], 20.0 - 0.5 * (0.0 - 1.0));
    }

    #[test]
    fn mean_estimate_validates_inputs() {
        let hf = ValuePair {
            shared: array![[1.0]],
            own: None,
        };
        let lf = ValuePair {
            shared: array![[1.0]],
            own: None,
        };
        assert!(compute_control_variate_mean_estimate(&[-1.0], &[hf.clone()]).is_err());
        assert!(compute_control_variate_mean_estimate(&[-1.0], &[hf, lf]).is_err());
    }
}
