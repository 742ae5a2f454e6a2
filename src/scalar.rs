//! The [`Scalar`] trait for writing derivative-generic numeric code.
//!
//! The variance formulas are written once as `fn f<T: Scalar>(r: &[T]) -> T` and
//! evaluated either with plain `f64` (values) or with `Dual<f64>` (exact derivatives).
//! This is the numeric backend the estimators are generic over.

use std::fmt::{Debug, Display};
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

use num_traits::{One, Zero};

use crate::dual::Dual;
use crate::float::Float;

/// A number the variance formulas can be evaluated with.
///
/// Comparisons (`PartialOrd`) act on the primal value, so branches taken inside a
/// formula are the same whichever scalar evaluates it.
pub trait Scalar:
    Copy
    + Default
    + Debug
    + Display
    + PartialOrd
    + Send
    + Sync
    + 'static
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
{
    /// The underlying primitive float type.
    type Float: Float;

    /// Lift a plain float to this scalar (constant, zero derivative).
    fn from_f(val: Self::Float) -> Self;

    /// Extract the primal value.
    fn value(&self) -> Self::Float;

    fn sqrt(self) -> Self;
    fn log10(self) -> Self;
    fn abs(self) -> Self;
    fn recip(self) -> Self;
    fn min(self, other: Self) -> Self;
    fn max(self, other: Self) -> Self;

    #[inline]
    fn is_nan(&self) -> bool {
        num_traits::Float::is_nan(self.value())
    }
}

macro_rules! impl_scalar_for_primitive {
    ($f:ty) => {
        impl Scalar for $f {
            type Float = $f;

            #[inline]
            fn from_f(val: $f) -> Self {
                val
            }

            #[inline]
            fn value(&self) -> $f {
                *self
            }

            #[inline]
            fn sqrt(self) -> Self {
                num_traits::Float::sqrt(self)
            }

            #[inline]
            fn log10(self) -> Self {
                num_traits::Float::log10(self)
            }

            #[inline]
            fn abs(self) -> Self {
                num_traits::Float::abs(self)
            }

            #[inline]
            fn recip(self) -> Self {
                num_traits::Float::recip(self)
            }

            #[inline]
            fn min(self, other: Self) -> Self {
                num_traits::Float::min(self, other)
            }

            #[inline]
            fn max(self, other: Self) -> Self {
                num_traits::Float::max(self, other)
            }
        }
    };
}

impl_scalar_for_primitive!(f32);
impl_scalar_for_primitive!(f64);

impl<F: Float> Scalar for Dual<F> {
    type Float = F;

    #[inline]
    fn from_f(val: F) -> Self {
        Dual::constant(val)
    }

    #[inline]
    fn value(&self) -> F {
        self.re
    }

    #[inline]
    fn sqrt(self) -> Self {
        Dual::sqrt(self)
    }

    #[inline]
    fn log10(self) -> Self {
        Dual::log10(self)
    }

    #[inline]
    fn abs(self) -> Self {
        Dual::abs(self)
    }

    #[inline]
    fn recip(self) -> Self {
        Dual::recip(self)
    }

    #[inline]
    fn min(self, other: Self) -> Self {
        Dual::min(self, other)
    }

    #[inline]
    fn max(self, other: Self) -> Self {
        Dual::max(self, other)
    }
}
