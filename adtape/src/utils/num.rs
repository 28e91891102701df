use std::fmt::Debug;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Trait implemented by every scalar type a differentiable program can be
/// written against: plain `f64`, reverse-mode [`Var`](crate::math::ad::var::Var)
/// and forward-mode [`Dual<T>`](crate::math::ad::dual::Dual) over any of them.
///
/// Generic code written once against `Real` is differentiated by picking the
/// scalar type at the call site.
pub trait Real:
    Copy
    + Debug
    + PartialEq
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
    + From<f64>
{
    /// Innermost primal value, looking through every differentiation level.
    fn value(&self) -> f64;

    fn ln(self) -> Self;
    fn log10(self) -> Self;
    fn exp(self) -> Self;
    fn powf(self, rhs: Self) -> Self;
    fn powi(self, n: i32) -> Self;
    /// Power with a constant exponent, which carries no derivative.
    fn powf_const(self, c: f64) -> Self;
    fn sqrt(self) -> Self;
    fn cbrt(self) -> Self;
    fn sin(self) -> Self;
    fn cos(self) -> Self;
    fn tan(self) -> Self;
    fn asin(self) -> Self;
    fn acos(self) -> Self;
    fn atan(self) -> Self;
    fn sinh(self) -> Self;
    fn cosh(self) -> Self;
    fn tanh(self) -> Self;
    fn abs(self) -> Self;
    fn floor(self) -> Self;
    fn ceil(self) -> Self;
    fn atan2(self, x: Self) -> Self;
    fn hypot(self, rhs: Self) -> Self;

    /// Zero value at every differentiation level.
    #[inline]
    fn is_zero(&self) -> bool {
        self.value() == 0.0
    }

    #[inline]
    fn square(self) -> Self {
        self * self
    }

    /* min / max compare primal values only */
    #[inline]
    fn min(self, other: Self) -> Self {
        if self < other {
            self
        } else {
            other
        }
    }
    #[inline]
    fn max(self, other: Self) -> Self {
        if self > other {
            self
        } else {
            other
        }
    }

    /* helpers so `c - x` and `c / x` compile in generic code */
    #[inline]
    fn sub_from_const(c: f64, x: Self) -> Self {
        Self::from(c) - x
    }
    #[inline]
    fn div_from_const(c: f64, x: Self) -> Self {
        Self::from(c) / x
    }
}

impl Real for f64 {
    #[inline]
    fn value(&self) -> f64 {
        *self
    }
    fn ln(self) -> Self {
        f64::ln(self)
    }
    fn log10(self) -> Self {
        f64::log10(self)
    }
    fn exp(self) -> Self {
        f64::exp(self)
    }
    fn powf(self, rhs: Self) -> Self {
        f64::powf(self, rhs)
    }
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }
    fn powf_const(self, c: f64) -> Self {
        f64::powf(self, c)
    }
    fn sqrt(self) -> Self {
        f64::sqrt(self)
    }
    fn cbrt(self) -> Self {
        f64::cbrt(self)
    }
    fn sin(self) -> Self {
        f64::sin(self)
    }
    fn cos(self) -> Self {
        f64::cos(self)
    }
    fn tan(self) -> Self {
        f64::tan(self)
    }
    fn asin(self) -> Self {
        f64::asin(self)
    }
    fn acos(self) -> Self {
        f64::acos(self)
    }
    fn atan(self) -> Self {
        f64::atan(self)
    }
    fn sinh(self) -> Self {
        f64::sinh(self)
    }
    fn cosh(self) -> Self {
        f64::cosh(self)
    }
    fn tanh(self) -> Self {
        f64::tanh(self)
    }
    fn abs(self) -> Self {
        f64::abs(self)
    }
    fn floor(self) -> Self {
        f64::floor(self)
    }
    fn ceil(self) -> Self {
        f64::ceil(self)
    }
    fn atan2(self, x: Self) -> Self {
        f64::atan2(self, x)
    }
    fn hypot(self, rhs: Self) -> Self {
        f64::hypot(self, rhs)
    }
    #[inline]
    fn sub_from_const(c: f64, x: Self) -> Self {
        c - x
    }
    #[inline]
    fn div_from_const(c: f64, x: Self) -> Self {
        c / x
    }
}
