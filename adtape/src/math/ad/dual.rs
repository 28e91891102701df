//! Forward-mode dual numbers.
//!
//! `Dual<T>` carries a value and a tangent of the same scalar type and
//! applies the chain rule eagerly, at the call site. Because it is itself a
//! [`Real`], it nests: `Dual<f64>` is first-order forward mode, `Dual<Var>`
//! is forward-over-reverse and `Dual<Dual<T>>` gives second (and, over
//! `Var`, third) order derivatives. No level knows it is nested.

use std::cmp::Ordering;
use std::f64::consts::LN_10;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use crate::utils::num::Real;

#[derive(Clone, Copy, Debug)]
pub struct Dual<T> {
    pub val: T,
    pub tan: T,
}

impl<T: Real> Dual<T> {
    pub fn new(val: T, tan: T) -> Self {
        Self { val, tan }
    }

    /// Zero tangent.
    pub fn constant(val: T) -> Self {
        Self {
            val,
            tan: T::from(0.0),
        }
    }

    /// Unit tangent: the direction being differentiated.
    pub fn variable(val: T) -> Self {
        Self {
            val,
            tan: T::from(1.0),
        }
    }

    #[inline]
    fn chain(val: T, tan: T) -> Self {
        Self { val, tan }
    }

    pub fn ln(self) -> Self {
        Self::chain(self.val.ln(), self.tan / self.val)
    }
    pub fn log10(self) -> Self {
        Self::chain(self.val.log10(), self.tan / (self.val * LN_10))
    }
    pub fn exp(self) -> Self {
        let e = self.val.exp();
        Self::chain(e, self.tan * e)
    }
    pub fn sqrt(self) -> Self {
        let s = self.val.sqrt();
        Self::chain(s, self.tan / (s * 2.0))
    }
    pub fn cbrt(self) -> Self {
        let c = self.val.cbrt();
        Self::chain(c, self.tan / (c * c * 3.0))
    }
    pub fn sin(self) -> Self {
        Self::chain(self.val.sin(), self.tan * self.val.cos())
    }
    pub fn cos(self) -> Self {
        Self::chain(self.val.cos(), -(self.tan * self.val.sin()))
    }
    pub fn tan(self) -> Self {
        let t = self.val.tan();
        Self::chain(t, self.tan * (t * t + 1.0))
    }
    pub fn asin(self) -> Self {
        let d = T::sub_from_const(1.0, self.val * self.val).sqrt();
        Self::chain(self.val.asin(), self.tan / d)
    }
    pub fn acos(self) -> Self {
        let d = T::sub_from_const(1.0, self.val * self.val).sqrt();
        Self::chain(self.val.acos(), -(self.tan / d))
    }
    pub fn atan(self) -> Self {
        Self::chain(self.val.atan(), self.tan / (self.val * self.val + 1.0))
    }
    pub fn sinh(self) -> Self {
        Self::chain(self.val.sinh(), self.tan * self.val.cosh())
    }
    pub fn cosh(self) -> Self {
        Self::chain(self.val.cosh(), self.tan * self.val.sinh())
    }
    pub fn tanh(self) -> Self {
        let t = self.val.tanh();
        Self::chain(t, self.tan * T::sub_from_const(1.0, t * t))
    }

    /// Zero derivative at zero; NaN in both parts for a NaN value.
    pub fn abs(self) -> Self {
        let x = self.val.value();
        if x > 0.0 {
            self
        } else if x < 0.0 {
            -self
        } else if x == 0.0 {
            Self::constant(T::from(0.0))
        } else {
            Self::chain(T::from(f64::NAN), T::from(f64::NAN))
        }
    }
    pub fn floor(self) -> Self {
        Self::constant(self.val.floor())
    }
    pub fn ceil(self) -> Self {
        Self::constant(self.val.ceil())
    }

    /// The `ln(val)` term is left out when the exponent has no tangent and
    /// the base is not positive, where it would be NaN.
    pub fn powf(self, rhs: Self) -> Self {
        let v = self.val.powf(rhs.val);
        if rhs.tan.is_zero() && !(self.val.value() > 0.0) {
            let d = self.val.powf(rhs.val - 1.0);
            return Self::chain(v, self.tan * rhs.val * d);
        }
        let tan = (rhs.tan * self.val.ln() + rhs.val * self.tan / self.val) * v;
        Self::chain(v, tan)
    }
    pub fn powf_const(self, c: f64) -> Self {
        Self::chain(
            self.val.powf_const(c),
            self.tan * self.val.powf_const(c - 1.0) * c,
        )
    }
    pub fn powi(self, n: i32) -> Self {
        match n {
            0 => Self::constant(T::from(1.0)),
            1 => self,
            _ => {
                let d = match n.checked_sub(1) {
                    Some(m) => self.val.powi(m),
                    None => self.val.powf_const(n as f64 - 1.0),
                };
                Self::chain(self.val.powi(n), self.tan * d * n as f64)
            }
        }
    }
    pub fn atan2(self, x: Self) -> Self {
        let d = self.val * self.val + x.val * x.val;
        Self::chain(
            self.val.atan2(x.val),
            (self.tan * x.val - x.tan * self.val) / d,
        )
    }
    pub fn hypot(self, rhs: Self) -> Self {
        let h = self.val.hypot(rhs.val);
        Self::chain(h, (self.tan * self.val + rhs.tan * rhs.val) / h)
    }
}

/// Projections of a second-order number. With `x = Dual::new(Dual::new(x0,
/// 1), Dual::new(1, 0))`, `val_val` is `f`, `val_tan` and `tan_val` are `f'`
/// and `tan_tan` is `f''`.
impl<T: Real> Dual<Dual<T>> {
    pub fn val_val(&self) -> T {
        self.val.val
    }
    pub fn val_tan(&self) -> T {
        self.val.tan
    }
    pub fn tan_val(&self) -> T {
        self.tan.val
    }
    pub fn tan_tan(&self) -> T {
        self.tan.tan
    }
}

/* ═══════════════════════  ARITHMETIC  ══════════════════════════════ */

impl<T: Real> Add for Dual<T> {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::chain(self.val + rhs.val, self.tan + rhs.tan)
    }
}
impl<T: Real> Sub for Dual<T> {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::chain(self.val - rhs.val, self.tan - rhs.tan)
    }
}
impl<T: Real> Mul for Dual<T> {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self::chain(
            self.val * rhs.val,
            self.tan * rhs.val + rhs.tan * self.val,
        )
    }
}
impl<T: Real> Div for Dual<T> {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        Self::chain(
            self.val / rhs.val,
            (self.tan * rhs.val - rhs.tan * self.val) / (rhs.val * rhs.val),
        )
    }
}
impl<T: Real> Neg for Dual<T> {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::chain(-self.val, -self.tan)
    }
}

impl<T: Real> Add<f64> for Dual<T> {
    type Output = Self;
    #[inline]
    fn add(self, c: f64) -> Self {
        Self::chain(self.val + c, self.tan)
    }
}
impl<T: Real> Sub<f64> for Dual<T> {
    type Output = Self;
    #[inline]
    fn sub(self, c: f64) -> Self {
        Self::chain(self.val - c, self.tan)
    }
}
impl<T: Real> Mul<f64> for Dual<T> {
    type Output = Self;
    #[inline]
    fn mul(self, c: f64) -> Self {
        Self::chain(self.val * c, self.tan * c)
    }
}
impl<T: Real> Div<f64> for Dual<T> {
    type Output = Self;
    #[inline]
    fn div(self, c: f64) -> Self {
        Self::chain(self.val / c, self.tan / c)
    }
}

/* constant on the left */
impl<T: Real> Add<Dual<T>> for f64 {
    type Output = Dual<T>;
    fn add(self, r: Dual<T>) -> Dual<T> {
        r + self
    }
}
impl<T: Real> Sub<Dual<T>> for f64 {
    type Output = Dual<T>;
    fn sub(self, r: Dual<T>) -> Dual<T> {
        Dual::chain(T::sub_from_const(self, r.val), -r.tan)
    }
}
impl<T: Real> Mul<Dual<T>> for f64 {
    type Output = Dual<T>;
    fn mul(self, r: Dual<T>) -> Dual<T> {
        r * self
    }
}
impl<T: Real> Div<Dual<T>> for f64 {
    type Output = Dual<T>;
    fn div(self, r: Dual<T>) -> Dual<T> {
        Dual::chain(
            T::div_from_const(self, r.val),
            -(r.tan * self) / (r.val * r.val),
        )
    }
}

macro_rules! assign_ops {
    ($($tr:ident $f:ident => $op:tt;)*) => {
        $(
            impl<T: Real> $tr for Dual<T> {
                #[inline]
                fn $f(&mut self, rhs: Dual<T>) {
                    *self = *self $op rhs;
                }
            }
            impl<T: Real> $tr<f64> for Dual<T> {
                #[inline]
                fn $f(&mut self, rhs: f64) {
                    *self = *self $op rhs;
                }
            }
        )*
    };
}

assign_ops! {
    AddAssign add_assign => +;
    SubAssign sub_assign => -;
    MulAssign mul_assign => *;
    DivAssign div_assign => /;
}

impl<T: Real> Sum for Dual<T> {
    fn sum<I: Iterator<Item = Dual<T>>>(iter: I) -> Self {
        iter.fold(Dual::constant(T::from(0.0)), |acc, x| acc + x)
    }
}

impl<T: Real> PartialEq for Dual<T> {
    fn eq(&self, o: &Self) -> bool {
        self.val == o.val
    }
}
impl<T: Real> PartialOrd for Dual<T> {
    fn partial_cmp(&self, o: &Self) -> Option<Ordering> {
        self.val.partial_cmp(&o.val)
    }
}

impl<T: Real> From<f64> for Dual<T> {
    fn from(v: f64) -> Self {
        Dual::constant(T::from(v))
    }
}

impl<T: fmt::Display> fmt::Display for Dual<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}ε", self.val, self.tan)
    }
}

impl<T: Real> Real for Dual<T> {
    #[inline]
    fn value(&self) -> f64 {
        self.val.value()
    }
    fn ln(self) -> Self {
        Dual::ln(self)
    }
    fn log10(self) -> Self {
        Dual::log10(self)
    }
    fn exp(self) -> Self {
        Dual::exp(self)
    }
    fn powf(self, rhs: Self) -> Self {
        Dual::powf(self, rhs)
    }
    fn powi(self, n: i32) -> Self {
        Dual::powi(self, n)
    }
    fn powf_const(self, c: f64) -> Self {
        Dual::powf_const(self, c)
    }
    fn is_zero(&self) -> bool {
        self.val.is_zero() && self.tan.is_zero()
    }
    fn sqrt(self) -> Self {
        Dual::sqrt(self)
    }
    fn cbrt(self) -> Self {
        Dual::cbrt(self)
    }
    fn sin(self) -> Self {
        Dual::sin(self)
    }
    fn cos(self) -> Self {
        Dual::cos(self)
    }
    fn tan(self) -> Self {
        Dual::tan(self)
    }
    fn asin(self) -> Self {
        Dual::asin(self)
    }
    fn acos(self) -> Self {
        Dual::acos(self)
    }
    fn atan(self) -> Self {
        Dual::atan(self)
    }
    fn sinh(self) -> Self {
        Dual::sinh(self)
    }
    fn cosh(self) -> Self {
        Dual::cosh(self)
    }
    fn tanh(self) -> Self {
        Dual::tanh(self)
    }
    fn abs(self) -> Self {
        Dual::abs(self)
    }
    fn floor(self) -> Self {
        Dual::floor(self)
    }
    fn ceil(self) -> Self {
        Dual::ceil(self)
    }
    fn atan2(self, x: Self) -> Self {
        Dual::atan2(self, x)
    }
    fn hypot(self, rhs: Self) -> Self {
        Dual::hypot(self, rhs)
    }
    fn sub_from_const(c: f64, x: Self) -> Self {
        c - x
    }
    fn div_from_const(c: f64, x: Self) -> Self {
        c / x
    }
}
