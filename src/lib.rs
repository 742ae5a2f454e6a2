//! Optimal sample allocation and approximate control variate (ACV) estimators for
//! multi-fidelity Monte Carlo.
//!
//! Given the covariance between `n` models (high fidelity first), their costs and a
//! budget, the crate decides how many samples each model gets and how to combine
//! the model outputs into a low-variance estimate of the high-fidelity mean.
//!
//! ```
//! use acvmc::{allocate_samples_mlmc, Covariance};
//!
//! let cov = Covariance::from_rows(&[
//!     vec![1.0, 0.5, 0.25],
//!     vec![0.5, 1.0, 0.5],
//!     vec![0.25, 0.5, 4.0],
//! ])?;
//! let alloc = allocate_samples_mlmc(&cov, &[6.0, 3.0, 1.0], 81.0, true)?;
//! assert_eq!(alloc.nhf_samples, 3.0);
//! assert_eq!(alloc.ratios, vec![4.0, 9.0]);
//! # Ok::<(), acvmc::AcvError>(())
//! ```
//!
//! Variance formulas are generic over [`Scalar`], so the allocation objective is
//! differentiated exactly with forward-mode [`Dual`] numbers.

pub mod allocation;
pub mod api;
pub mod control_variate;
pub mod covariance;
pub mod discrepancy;
pub mod dual;
pub mod ensemble;
pub mod error;
pub mod estimator;
pub mod float;
pub mod linalg;
pub mod sampling;
pub mod scalar;
mod traits;
pub mod variance;

pub use allocation::{
    allocate_samples_acv, allocate_samples_acv_best_kl, allocate_samples_mfmc,
    allocate_samples_mlmc, mlmc_lagrange_multiplier, Allocation, AllocationConfig, KlAllocation,
    OptimMethod,
};
pub use api::{gradient, jvp};
pub use control_variate::{
    acv_control_variate_weights, compute_control_variate_mean_estimate,
    mfmc_control_variate_weights, mlmc_control_variate_weights,
};
pub use covariance::{
    compute_correlations_from_covariance, standardize_sample_ratios, validate_costs, Covariance,
};
pub use discrepancy::{
    discrepancy_covariances_is, discrepancy_covariances_kl, discrepancy_covariances_mf,
    Discrepancy, DiscrepancyStrategy,
};
pub use dual::Dual;
pub use ensemble::{Model, ModelEnsemble, TaggedModel, TaggedSamples};
pub use error::{AcvError, Result};
pub use estimator::{Acv, Estimator, Mfmc, Mlmc};
pub use float::Float;
pub use sampling::{
    generate_samples_and_values_acv_is, generate_samples_and_values_mfmc,
    generate_samples_and_values_mlmc, ModelSet, SamplePair, SampleSets, ValuePair,
};
pub use scalar::Scalar;
pub use variance::{
    check_mfmc_model_ordering, degenerate_controls, rsquared_acv, rsquared_acv_nondegenerate,
    rsquared_control_variate, rsquared_mfmc, rsquared_mlmc, VarianceModel,
};

/// Type alias for forward-mode dual numbers over `f64`.
pub type Dual64 = Dual<f64>;
