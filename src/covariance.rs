//! Model covariance, correlation and sample-count helpers.

use ndarray::Array2;

use crate::error::{AcvError, Result};

/// Relative tolerance used when checking that a covariance is symmetric.
const SYMMETRY_TOL: f64 = 1e-8;

/// Covariance between the outputs of `n >= 2` models.
///
/// Index 0 is the high-fidelity model; the remaining models are the low-fidelity
/// control variates. The matrix is validated once on construction and is immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Covariance {
    matrix: Array2<f64>,
}

impl Covariance {
    /// Validate and wrap a covariance matrix.
    ///
    /// The matrix must be square with at least two models, finite, symmetric and have
    /// a strictly positive diagonal.
    pub fn new(matrix: Array2<f64>) -> Result<Self> {
        let (rows, cols) = matrix.dim();
        if rows != cols {
            return Err(AcvError::covariance(format!(
                "matrix must be square, got {rows}x{cols}"
            )));
        }
        if rows < 2 {
            return Err(AcvError::covariance(format!(
                "at least two models are required, got {rows}"
            )));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(AcvError::covariance("matrix has non-finite entries"));
        }
        for i in 0..rows {
            if matrix[(i, i)] <= 0.0 {
                return Err(AcvError::covariance(format!(
                    "variance of model {i} is {}, must be positive",
                    matrix[(i, i)]
                )));
            }
        }
        let scale = matrix.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        for i in 0..rows {
            for j in (i + 1)..rows {
                if (matrix[(i, j)] - matrix[(j, i)]).abs() > SYMMETRY_TOL * scale {
                    return Err(AcvError::covariance(format!(
                        "matrix is not symmetric at ({i}, {j})"
                    )));
                }
            }
        }
        Ok(Covariance { matrix })
    }

    /// Build from nested rows; convenient for small literal matrices.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n = rows.len();
        if let Some(row) = rows.iter().find(|row| row.len() != n) {
            return Err(AcvError::covariance(format!(
                "matrix must be square, got a row of length {} in a {n}-row matrix",
                row.len()
            )));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let matrix = Array2::from_shape_vec((n, n), flat)
            .map_err(|e| AcvError::covariance(e.to_string()))?;
        Covariance::new(matrix)
    }

    /// Number of models, including the high-fidelity one.
    pub fn nmodels(&self) -> usize {
        self.matrix.nrows()
    }

    /// Variance of the high-fidelity model.
    pub fn hf_variance(&self) -> f64 {
        self.matrix[(0, 0)]
    }

    /// The full `n × n` covariance, high-fidelity model first.
    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// Covariance restricted to the listed models, in the given order.
    pub fn select(&self, models: &[usize]) -> Result<Self> {
        let n = self.nmodels();
        if let Some(&bad) = models.iter().find(|&&m| m >= n) {
            return Err(AcvError::covariance(format!(
                "model {bad} out of range for {n} models"
            )));
        }
        let sub = Array2::from_shape_fn((models.len(), models.len()), |(i, j)| {
            self.matrix[(models[i], models[j])]
        });
        Covariance::new(sub)
    }

    /// `corr = D^{-1/2} C D^{-1/2}` with `D = diag(C)`.
    pub fn correlation(&self) -> Array2<f64> {
        compute_correlations_from_covariance(&self.matrix)
    }
}

impl std::ops::Index<(usize, usize)> for Covariance {
    type Output = f64;

    fn index(&self, idx: (usize, usize)) -> &f64 {
        &self.matrix[idx]
    }
}

/// Correlation matrix of a covariance matrix with a positive diagonal.
pub fn compute_correlations_from_covariance(cov: &Array2<f64>) -> Array2<f64> {
    let std: Vec<f64> = cov.diag().iter().map(|v| v.sqrt()).collect();
    Array2::from_shape_fn(cov.dim(), |(i, j)| cov[(i, j)] / (std[i] * std[j]))
}

/// Check that there is one finite, positive cost per model.
pub fn validate_costs(costs: &[f64], nmodels: usize) -> Result<()> {
    if costs.len() != nmodels {
        return Err(AcvError::costs(format!(
            "expected {nmodels} costs, got {}",
            costs.len()
        )));
    }
    if let Some((i, c)) = costs
        .iter()
        .enumerate()
        .find(|(_, c)| !c.is_finite() || **c <= 0.0)
    {
        return Err(AcvError::costs(format!(
            "cost of model {i} is {c}, must be positive"
        )));
    }
    Ok(())
}

/// Round an allocation to whole sample counts.
///
/// `Nhf` is rounded to the nearest integer (at least one), then each ratio is chosen
/// so that `r_i · Nhf` is the nearest whole number to the unrounded low-fidelity
/// sample count. Ratios never drop below one.
pub fn standardize_sample_ratios(nhf_samples: f64, ratios: &[f64]) -> (f64, Vec<f64>) {
    let nhf = nhf_samples.round().max(1.0);
    let ratios = ratios
        .iter()
        .map(|r| ((r * nhf_samples).round() / nhf).max(1.0))
        .collect();
    (nhf, ratios)
}
