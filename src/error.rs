//! Error types for covariance validation, variance models, allocation and sampling.

use acvmc_optim::TerminationReason;

use crate::allocation::OptimMethod;

/// Errors raised by the estimators, allocators and sampling schemes.
///
/// Every variant except [`AcvError::OptimizerFailed`] is a precondition violation.
#[derive(Debug, thiserror::Error)]
pub enum AcvError {
    /// The covariance matrix is not a valid model covariance.
    #[error("invalid covariance: {msg}")]
    InvalidCovariance {
        /// Human-readable error description.
        msg: String,
    },

    /// Model costs are missing, non-finite or non-positive.
    #[error("invalid costs: {msg}")]
    InvalidCosts {
        /// Human-readable error description.
        msg: String,
    },

    /// A length does not match the number of models.
    #[error("{what}: expected {expected} entries, got {got}")]
    DimensionMismatch {
        /// What was being checked.
        what: &'static str,
        /// Expected length.
        expected: usize,
        /// Supplied length.
        got: usize,
    },

    /// Low-fidelity models are not ordered by decreasing correlation with the
    /// high-fidelity model.
    #[error(
        "models must be ordered by decreasing |cov[0, i]|; model {model} breaks the ordering"
    )]
    ModelOrdering {
        /// Index of the first model out of order.
        model: usize,
    },

    /// Ratios were supplied to a model that does not take them.
    #[error("sample ratios must not be supplied for the optimal control variate")]
    UnexpectedRatios,

    /// Ratios are required but were not supplied.
    #[error("sample ratios are required for this variance model")]
    MissingRatios,

    /// Ratios are out of range (below one, non-finite or wrongly ordered).
    #[error("invalid sample ratios: {msg}")]
    InvalidRatios {
        /// Human-readable error description.
        msg: String,
    },

    /// `r_i · Nhf` is not a whole number of samples.
    #[error("model {model} would need {count} samples, which is not an integer")]
    NonIntegralSampleCount {
        /// Model index.
        model: usize,
        /// The non-integral sample count.
        count: f64,
    },

    /// The (K, L) partition is outside `1 <= L <= K <= n - 1`.
    #[error("invalid partition K={k}, L={l} for {nmodels} models")]
    InvalidPartition {
        /// Number of control variates sharing the high-fidelity samples.
        k: usize,
        /// Index of the model the remaining control variates share samples with.
        l: usize,
        /// Total number of models.
        nmodels: usize,
    },

    /// A linear system in the variance formulas is singular.
    #[error("singular matrix in {context}")]
    SingularMatrix {
        /// Which system could not be solved.
        context: &'static str,
    },

    /// The closed-form allocation produced a NaN variance.
    #[error("allocation produced a NaN variance")]
    NanVariance,

    /// The constrained optimizer did not converge.
    #[error("{method} optimizer failed: {reason}")]
    OptimizerFailed {
        /// The method that was run.
        method: OptimMethod,
        /// Why it stopped.
        reason: TerminationReason,
    },

    /// The computational budget is not a positive finite number.
    #[error("invalid target cost {target}")]
    InvalidBudget {
        /// The rejected budget.
        target: f64,
    },

    /// A model returned output of the wrong shape or an unknown model id was used.
    #[error("model evaluation failed: {msg}")]
    ModelEvaluation {
        /// Human-readable error description.
        msg: String,
    },
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, AcvError>;

impl AcvError {
    /// Create an invalid covariance error.
    pub fn covariance<S: Into<String>>(msg: S) -> Self {
        Self::InvalidCovariance { msg: msg.into() }
    }

    /// Create an invalid costs error.
    pub fn costs<S: Into<String>>(msg: S) -> Self {
        Self::InvalidCosts { msg: msg.into() }
    }

    /// Create an invalid ratios error.
    pub fn ratios<S: Into<String>>(msg: S) -> Self {
        Self::InvalidRatios { msg: msg.into() }
    }

    /// Create a model evaluation error.
    pub fn evaluation<S: Into<String>>(msg: S) -> Self {
        Self::ModelEvaluation { msg: msg.into() }
    }
}

/// Fail with [`AcvError::DimensionMismatch`] unless `got == expected`.
pub(crate) fn check_len(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(AcvError::DimensionMismatch {
            what,
            expected,
            got,
        })
    }
}
