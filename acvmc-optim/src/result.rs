use std::fmt;

/// Result of a constrained optimization run.
#[derive(Debug, Clone)]
pub struct ConstrainedResult<F> {
    /// Solution point.
    pub x: Vec<F>,
    /// Objective value at the solution.
    pub value: F,
    /// Objective gradient at the solution.
    pub gradient: Vec<F>,
    /// Lagrange multiplier estimates for the equality constraints.
    pub multipliers: Vec<F>,
    /// Largest violation over equality and inequality constraints at the solution.
    pub constraint_violation: F,
    /// Number of outer iterations performed.
    pub iterations: usize,
    /// Total number of objective function evaluations.
    pub func_evals: usize,
    /// Reason for termination.
    pub termination: TerminationReason,
}

impl<F> ConstrainedResult<F> {
    /// Whether the solver stopped at an acceptable KKT point.
    pub fn is_success(&self) -> bool {
        self.termination.is_success()
    }
}

/// Why the optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Stationarity and feasibility tolerances were met.
    Optimal,
    /// Step size (or trust radius) fell below tolerance at a feasible point.
    StepSize,
    /// Change in objective value fell below tolerance at a feasible point.
    FunctionChange,
    /// Reached the maximum number of iterations.
    MaxIterations,
    /// Merit line search could not find a sufficient decrease.
    LineSearchFailed,
    /// The quadratic subproblem was infeasible or could not be solved.
    SubproblemFailed,
    /// No point strictly inside the linear inequalities could be found.
    InfeasibleStart,
    /// The iterate stalled at a point that violates the constraints.
    Infeasible,
    /// A numerical error occurred (e.g. singular constraint Jacobian, NaN).
    NumericalError,
}

impl TerminationReason {
    /// `true` for the reasons that certify a (local) constrained minimizer.
    pub fn is_success(self) -> bool {
        matches!(
            self,
            TerminationReason::Optimal
                | TerminationReason::StepSize
                | TerminationReason::FunctionChange
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::Optimal => write!(f, "KKT conditions satisfied"),
            TerminationReason::StepSize => write!(f, "step size below tolerance"),
            TerminationReason::FunctionChange => write!(f, "function change below tolerance"),
            TerminationReason::MaxIterations => write!(f, "maximum iterations reached"),
            TerminationReason::LineSearchFailed => write!(f, "merit line search failed"),
            TerminationReason::SubproblemFailed => write!(f, "quadratic subproblem failed"),
            TerminationReason::InfeasibleStart => {
                write!(f, "no strictly feasible starting point for the inequalities")
            }
            TerminationReason::Infeasible => write!(f, "stalled at an infeasible point"),
            TerminationReason::NumericalError => write!(f, "numerical error"),
        }
    }
}
