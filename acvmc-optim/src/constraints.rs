use num_traits::Float;

use crate::convergence::dot;

/// A set of linear inequality constraints `rows[i] · x >= rhs[i]`.
///
/// Simple lower bounds are the special case of a unit row.
#[derive(Debug, Clone)]
pub struct LinearInequalities<F> {
    dim: usize,
    rows: Vec<Vec<F>>,
    rhs: Vec<F>,
}

impl<F: Float> LinearInequalities<F> {
    /// An empty constraint set over `dim` variables.
    pub fn new(dim: usize) -> Self {
        LinearInequalities {
            dim,
            rows: Vec::new(),
            rhs: Vec::new(),
        }
    }

    /// `x_i >= lower[i]` for every variable.
    pub fn lower_bounds(lower: &[F]) -> Self {
        let dim = lower.len();
        let mut set = Self::new(dim);
        for (i, &lb) in lower.iter().enumerate() {
            let mut row = vec![F::zero(); dim];
            row[i] = F::one();
            set.push(row, lb);
        }
        set
    }

    /// Append the constraint `row · x >= rhs`.
    ///
    /// # Panics
    ///
    /// Panics if `row.len()` differs from the constraint dimension.
    pub fn push(&mut self, row: Vec<F>, rhs: F) {
        assert_eq!(
            row.len(),
            self.dim,
            "constraint row has {} entries, expected {}",
            row.len(),
            self.dim
        );
        self.rows.push(row);
        self.rhs.push(rhs);
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<F>] {
        &self.rows
    }

    pub fn rhs(&self) -> &[F] {
        &self.rhs
    }

    /// `rows · x - rhs`, non-negative where the constraints hold.
    pub fn slacks(&self, x: &[F]) -> Vec<F> {
        self.rows
            .iter()
            .zip(&self.rhs)
            .map(|(row, &b)| dot(row, x) - b)
            .collect()
    }

    /// Largest amount by which any constraint is violated (zero if all hold).
    pub fn max_violation(&self, x: &[F]) -> F {
        self.slacks(x)
            .into_iter()
            .fold(F::zero(), |m, s| m.max(F::zero() - s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_bounds_slacks() {
        let set = LinearInequalities::lower_bounds(&[1.0, 2.0]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.slacks(&[3.0, 1.5]), vec![2.0, -0.5]);
        assert_eq!(set.max_violation(&[3.0, 1.5]), 0.5);
        assert_eq!(set.max_violation(&[3.0, 2.5]), 0.0);
    }

    #[test]
    fn general_rows() {
        let mut set = LinearInequalities::new(3);
        set.push(vec![0.0, -1.0, 1.0], 0.0);
        assert_eq!(set.slacks(&[0.0, 2.0, 5.0]), vec![3.0]);
        assert!(!set.is_empty());
    }

    #[test]
    #[should_panic(expected = "constraint row has 2 entries")]
    fn wrong_row_length_panics() {
        let mut set = LinearInequalities::<f64>::new(3);
        set.push(vec![1.0, 0.0], 0.0);
    }
}
