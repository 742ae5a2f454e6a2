use crate::dual::Dual;
use crate::error::{check_len, Result};
use crate::float::Float;

/// Value and gradient of a scalar function `f : R^n → R` using forward mode.
///
/// Runs one forward pass per input; the inputs here are sample-allocation variables,
/// so `n` is the number of models.
///
/// ```
/// let (v, g) = acvmc::gradient(|x: &[acvmc::Dual<f64>]| x[0] * x[0] * x[1], &[3.0, 2.0]);
/// assert_eq!(v, 18.0);
/// assert_eq!(g, vec![12.0, 9.0]);
/// ```
pub fn gradient<F: Float>(f: impl Fn(&[Dual<F>]) -> Dual<F>, x: &[F]) -> (F, Vec<F>) {
    let n = x.len();
    let mut inputs: Vec<Dual<F>> = x.iter().map(|&xi| Dual::constant(xi)).collect();

    if n == 0 {
        return (f(&inputs).re, Vec::new());
    }

    let mut value = F::zero();
    let mut grad = Vec::with_capacity(n);
    for j in 0..n {
        inputs[j].eps = F::one();
        let out = f(&inputs);
        inputs[j].eps = F::zero();
        value = out.re;
        grad.push(out.eps);
    }
    (value, grad)
}

/// Directional derivative (forward mode): `(f(x), ∇f(x)·v)`.
///
/// Fails with [`AcvError::DimensionMismatch`](crate::AcvError::DimensionMismatch)
/// when `v` and `x` differ in length.
pub fn jvp<F: Float>(f: impl Fn(&[Dual<F>]) -> Dual<F>, x: &[F], v: &[F]) -> Result<(F, F)> {
    check_len("direction", x.len(), v.len())?;
    let inputs: Vec<Dual<F>> = x
        .iter()
        .zip(v.iter())
        .map(|(&xi, &vi)| Dual::new(xi, vi))
        .collect();
    let out = f(&inputs);
    Ok((out.re, out.eps))
}
