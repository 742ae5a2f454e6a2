//! Small dense constrained optimizers.
//!
//! Problems have the form
//!
//! ```text
//! min f(x)  s.t.  c(x) = 0,  G x >= h
//! ```
//!
//! with the objective and equality constraints supplied through
//! [`ConstrainedObjective`] and the linear inequalities (bounds included) through
//! [`LinearInequalities`]. Two solvers are provided: [`sqp`], an active-set SQP method
//! with a damped BFGS Hessian and an L1 merit line search, and [`trust_constr`], a
//! trust-region interior-point method.

pub mod bfgs;
pub mod constraints;
pub mod convergence;
pub mod line_search;
pub mod linalg;
pub mod objective;
pub mod qp;
pub mod result;
pub mod solvers;

pub use bfgs::Bfgs;
pub use constraints::LinearInequalities;
pub use convergence::ConvergenceParams;
pub use line_search::MeritParams;
pub use objective::{ConstrainedObjective, Objective};
pub use qp::{solve_qp, QpSolution};
pub use result::{ConstrainedResult, TerminationReason};
pub use solvers::sqp::{sqp, SqpConfig};
pub use solvers::trust_constr::{trust_constr, TrustConstrConfig};
