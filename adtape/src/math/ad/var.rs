use std::cmp::Ordering;
use std::fmt;
use std::iter::Sum;
use std::marker::PhantomData;
use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, Sub, SubAssign};

use super::node::{BinaryOp, NodeId, Op, UnaryOp};
use super::tape::{self, raise, with_tape, Tape};
use crate::math::checks::check_matching_sizes;
use crate::utils::errors::{AdError, Result};
use crate::utils::num::Real;

/// Handle to a node on the calling thread's tape.
///
/// Handles are cheap to copy and share; every arithmetic operation records a
/// new node and returns a new handle. A handle is only meaningful on the
/// thread that created it and only until the next recovery of that thread's
/// tape, after which every use reports [`AdError::StaleHandle`].
#[derive(Clone, Copy, Debug)]
pub struct Var {
    id: NodeId,
    value: f64,
    _not_send: PhantomData<*const ()>,
}

impl Var {
    /// New leaf node.
    #[inline]
    pub fn new(v: f64) -> Self {
        Self::record(&[], v, Op::Leaf)
    }

    #[inline]
    pub fn id(&self) -> NodeId {
        self.id
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn adjoint(&self) -> Result<f64> {
        with_tape(|t| t.adjoint(self.id))
    }

    /// Whether the node behind this handle survived every recovery so far.
    pub fn is_live(&self) -> bool {
        with_tape(|t| t.resolve(self.id).is_ok())
    }

    /// Runs the backward pass from this node, reads the adjoint of every
    /// input and then recovers the whole tape, so every handle on this
    /// thread (not only those reachable from `self`) is stale afterwards.
    pub fn gradient(&self, inputs: &[Var]) -> Result<Vec<f64>> {
        with_tape(|t| {
            if t.nested_depth() > 0 {
                return Err(AdError::NestedScopeActive);
            }
            let grads = Self::backward_and_read(t, self.id, inputs)?;
            t.recover()?;
            log::trace!("var: gradient over {} inputs, tape recovered", inputs.len());
            Ok(grads)
        })
    }

    /// Like [`Var::gradient`] without the recovery. Adjoints accumulate across
    /// calls until [`tape::set_zero_all_adjoints`] or a recovery.
    pub fn gradient_no_recover(&self, inputs: &[Var]) -> Result<Vec<f64>> {
        with_tape(|t| Self::backward_and_read(t, self.id, inputs))
    }

    pub fn backward(&self) -> Result<()> {
        tape::grad(self.id)
    }

    fn backward_and_read(t: &mut Tape, root: NodeId, inputs: &[Var]) -> Result<Vec<f64>> {
        for x in inputs {
            t.resolve(x.id)?;
        }
        t.backward(root)?;
        inputs.iter().map(|x| t.adjoint(x.id)).collect()
    }

    /// Node whose partials with respect to `operands` were computed by the
    /// caller.
    pub fn precomputed(value: f64, operands: &[Var], partials: &[f64]) -> Result<Var> {
        check_matching_sizes("precomputed", operands.len(), partials.len())?;
        let idx = indices(operands);
        Ok(Self::record_with(operands, value, |t| {
            let span = t.push_operands(&idx)?;
            let ps = t.push_constants(partials)?;
            Ok(Op::Precomputed(span, ps))
        }))
    }

    /* ---- recording ---- */

    #[inline]
    pub(crate) fn from_node(id: NodeId, value: f64) -> Self {
        Var {
            id,
            value,
            _not_send: PhantomData,
        }
    }

    /// Checks the operands, lets `build` store any operand lists it needs and
    /// appends the resulting node. Stale operands and allocation failures
    /// are fatal here.
    pub(crate) fn record_with(
        operands: &[Var],
        value: f64,
        build: impl FnOnce(&mut Tape) -> Result<Op>,
    ) -> Var {
        let pushed = with_tape(|t| {
            for v in operands {
                t.resolve(v.id)?;
            }
            let op = build(t)?;
            t.push(value, op)
        });
        match pushed {
            Ok(id) => Var::from_node(id, value),
            Err(e) => raise(e),
        }
    }

    #[inline]
    fn record(operands: &[Var], value: f64, op: Op) -> Var {
        Self::record_with(operands, value, |_| Ok(op))
    }

    #[inline(always)]
    fn unary(self, op: UnaryOp) -> Var {
        Self::record(&[self], op.eval(self.value), Op::Unary(op, self.id.index))
    }

    #[inline(always)]
    fn binary(self, rhs: Var, op: BinaryOp) -> Var {
        Self::record(
            &[self, rhs],
            op.eval(self.value, rhs.value),
            Op::Binary(op, self.id.index, rhs.id.index),
        )
    }

    #[inline(always)]
    fn with_const(self, op: BinaryOp, c: f64) -> Var {
        Self::record(
            &[self],
            op.eval(self.value, c),
            Op::BinaryVarConst(op, self.id.index, c),
        )
    }

    #[inline(always)]
    fn const_with(c: f64, op: BinaryOp, rhs: Var) -> Var {
        Self::record(
            &[rhs],
            op.eval(c, rhs.value),
            Op::BinaryConstVar(op, c, rhs.id.index),
        )
    }

    /* ---- elementary functions ---- */

    /// New node forwarding the unit partial to `self`.
    pub fn identity(self) -> Self {
        self.unary(UnaryOp::Identity)
    }
    pub fn ln(self) -> Self {
        self.unary(UnaryOp::Ln)
    }
    pub fn log10(self) -> Self {
        self.unary(UnaryOp::Log10)
    }
    pub fn exp(self) -> Self {
        self.unary(UnaryOp::Exp)
    }
    pub fn sqrt(self) -> Self {
        self.unary(UnaryOp::Sqrt)
    }
    pub fn cbrt(self) -> Self {
        self.unary(UnaryOp::Cbrt)
    }
    pub fn sin(self) -> Self {
        self.unary(UnaryOp::Sin)
    }
    pub fn cos(self) -> Self {
        self.unary(UnaryOp::Cos)
    }
    pub fn tan(self) -> Self {
        self.unary(UnaryOp::Tan)
    }
    pub fn asin(self) -> Self {
        self.unary(UnaryOp::Asin)
    }
    pub fn acos(self) -> Self {
        self.unary(UnaryOp::Acos)
    }
    pub fn atan(self) -> Self {
        self.unary(UnaryOp::Atan)
    }
    pub fn sinh(self) -> Self {
        self.unary(UnaryOp::Sinh)
    }
    pub fn cosh(self) -> Self {
        self.unary(UnaryOp::Cosh)
    }
    pub fn tanh(self) -> Self {
        self.unary(UnaryOp::Tanh)
    }
    pub fn abs(self) -> Self {
        self.unary(UnaryOp::Abs)
    }

    /* piecewise constant: the node has no operands */
    pub fn floor(self) -> Self {
        Self::record(&[self], self.value.floor(), Op::Leaf)
    }
    pub fn ceil(self) -> Self {
        Self::record(&[self], self.value.ceil(), Op::Leaf)
    }

    pub fn powf(self, rhs: Var) -> Self {
        self.binary(rhs, BinaryOp::Pow)
    }
    pub fn powi(self, n: i32) -> Self {
        if n == 1 {
            return self;
        }
        self.with_const(BinaryOp::Pow, n as f64)
    }
    pub fn powf_const(self, c: f64) -> Self {
        self.with_const(BinaryOp::Pow, c)
    }
    pub fn atan2(self, x: Var) -> Self {
        self.binary(x, BinaryOp::Atan2)
    }
    pub fn hypot(self, rhs: Var) -> Self {
        self.binary(rhs, BinaryOp::Hypot)
    }
    /// Remainder with the sign of `self`, like `f64::rem`.
    pub fn fmod(self, rhs: Var) -> Self {
        self.binary(rhs, BinaryOp::Fmod)
    }
}

#[inline]
pub(crate) fn indices(vars: &[Var]) -> Vec<usize> {
    vars.iter().map(|v| v.id.index).collect()
}

/* ═══════════════════════  ARITHMETIC  ══════════════════════════════ */

impl Add for Var {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.binary(rhs, BinaryOp::Add)
    }
}
impl Add<f64> for Var {
    type Output = Self;
    #[inline]
    fn add(self, c: f64) -> Self {
        if c == 0.0 {
            return self;
        }
        self.with_const(BinaryOp::Add, c)
    }
}
impl Sub for Var {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.binary(rhs, BinaryOp::Sub)
    }
}
impl Sub<f64> for Var {
    type Output = Self;
    #[inline]
    fn sub(self, c: f64) -> Self {
        if c == 0.0 {
            return self;
        }
        self.with_const(BinaryOp::Sub, c)
    }
}
impl Mul for Var {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        self.binary(rhs, BinaryOp::Mul)
    }
}
impl Mul<f64> for Var {
    type Output = Self;
    #[inline]
    fn mul(self, k: f64) -> Self {
        if k == 1.0 {
            return self;
        }
        self.with_const(BinaryOp::Mul, k)
    }
}
impl Div for Var {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        self.binary(rhs, BinaryOp::Div)
    }
}
impl Div<f64> for Var {
    type Output = Self;
    #[inline]
    fn div(self, c: f64) -> Self {
        if c == 1.0 {
            return self;
        }
        self.with_const(BinaryOp::Div, c)
    }
}
impl Rem for Var {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        self.fmod(rhs)
    }
}
impl Rem<f64> for Var {
    type Output = Self;
    fn rem(self, c: f64) -> Self {
        self.with_const(BinaryOp::Fmod, c)
    }
}
impl Neg for Var {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        self.unary(UnaryOp::Neg)
    }
}

/* constant on the left */
impl Add<Var> for f64 {
    type Output = Var;
    #[inline]
    fn add(self, r: Var) -> Var {
        r + self
    }
}
impl Sub<Var> for f64 {
    type Output = Var;
    #[inline]
    fn sub(self, r: Var) -> Var {
        Var::const_with(self, BinaryOp::Sub, r)
    }
}
impl Mul<Var> for f64 {
    type Output = Var;
    #[inline]
    fn mul(self, r: Var) -> Var {
        r * self
    }
}
impl Div<Var> for f64 {
    type Output = Var;
    #[inline]
    fn div(self, r: Var) -> Var {
        Var::const_with(self, BinaryOp::Div, r)
    }
}
impl Rem<Var> for f64 {
    type Output = Var;
    fn rem(self, r: Var) -> Var {
        Var::const_with(self, BinaryOp::Fmod, r)
    }
}

macro_rules! assign_ops {
    ($($tr:ident $f:ident => $op:tt;)*) => {
        $(
            impl $tr for Var {
                #[inline]
                fn $f(&mut self, rhs: Var) {
                    *self = *self $op rhs;
                }
            }
            impl $tr<f64> for Var {
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

impl Sum for Var {
    fn sum<I: Iterator<Item = Var>>(iter: I) -> Var {
        let terms: Vec<Var> = iter.collect();
        crate::math::functions::sum(&terms)
    }
}
impl<'a> Sum<&'a Var> for Var {
    fn sum<I: Iterator<Item = &'a Var>>(iter: I) -> Var {
        iter.copied().sum()
    }
}

/* comparisons look at values only */
impl PartialEq for Var {
    fn eq(&self, o: &Self) -> bool {
        self.value.eq(&o.value)
    }
}
impl PartialOrd for Var {
    fn partial_cmp(&self, o: &Self) -> Option<Ordering> {
        self.value.partial_cmp(&o.value)
    }
}
impl PartialEq<f64> for Var {
    fn eq(&self, o: &f64) -> bool {
        self.value.eq(o)
    }
}
impl PartialOrd<f64> for Var {
    fn partial_cmp(&self, o: &f64) -> Option<Ordering> {
        self.value.partial_cmp(o)
    }
}

impl From<f64> for Var {
    fn from(v: f64) -> Self {
        Var::new(v)
    }
}
impl From<f32> for Var {
    fn from(v: f32) -> Self {
        Var::new(v as f64)
    }
}
impl From<i32> for Var {
    fn from(v: i32) -> Self {
        Var::new(v as f64)
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

/* ═══════════════════════  Real impl  ═══════════════════════════════ */

impl Real for Var {
    #[inline]
    fn value(&self) -> f64 {
        self.value
    }
    fn ln(self) -> Self {
        self.ln()
    }
    fn log10(self) -> Self {
        self.log10()
    }
    fn exp(self) -> Self {
        self.exp()
    }
    fn powf(self, rhs: Self) -> Self {
        self.powf(rhs)
    }
    fn powi(self, n: i32) -> Self {
        self.powi(n)
    }
    fn powf_const(self, c: f64) -> Self {
        self.powf_const(c)
    }
    fn sqrt(self) -> Self {
        self.sqrt()
    }
    fn cbrt(self) -> Self {
        self.cbrt()
    }
    fn sin(self) -> Self {
        self.sin()
    }
    fn cos(self) -> Self {
        self.cos()
    }
    fn tan(self) -> Self {
        self.tan()
    }
    fn asin(self) -> Self {
        self.asin()
    }
    fn acos(self) -> Self {
        self.acos()
    }
    fn atan(self) -> Self {
        self.atan()
    }
    fn sinh(self) -> Self {
        self.sinh()
    }
    fn cosh(self) -> Self {
        self.cosh()
    }
    fn tanh(self) -> Self {
        self.tanh()
    }
    fn abs(self) -> Self {
        self.abs()
    }
    fn floor(self) -> Self {
        self.floor()
    }
    fn ceil(self) -> Self {
        self.ceil()
    }
    fn atan2(self, x: Self) -> Self {
        self.atan2(x)
    }
    fn hypot(self, rhs: Self) -> Self {
        self.hypot(rhs)
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
