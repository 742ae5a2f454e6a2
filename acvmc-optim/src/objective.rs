use num_traits::Float;

/// Trait for optimization objectives.
///
/// Implementors provide function evaluation and gradient computation.
/// Methods take `&mut self` to allow caching, eval counting, and internal buffers.
pub trait Objective<F: Float> {
    /// Number of input variables.
    fn dim(&self) -> usize;

    /// Evaluate the objective and its gradient at `x`.
    ///
    /// Returns `(f(x), ∇f(x))`.
    fn eval_grad(&mut self, x: &[F]) -> (F, Vec<F>);
}

/// An objective together with nonlinear equality constraints `c(x) = 0`.
///
/// Linear inequalities (including simple bounds) are passed to the solvers
/// separately as [`LinearInequalities`](crate::LinearInequalities).
pub trait ConstrainedObjective<F: Float>: Objective<F> {
    /// Number of equality constraints.
    fn num_equalities(&self) -> usize;

    /// Evaluate `c(x)`, a vector of length [`num_equalities`](Self::num_equalities).
    fn equalities(&mut self, x: &[F]) -> Vec<F>;

    /// Jacobian of the equality constraints: `J[i][j] = ∂c_i/∂x_j`.
    fn equality_jacobian(&mut self, x: &[F]) -> Vec<Vec<F>>;
}
