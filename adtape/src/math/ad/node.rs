//! Tape nodes and the closed set of operation shapes they can record.

use std::f64::consts::LN_10;

use crate::memory::arena::Span;

/// Checked reference to a node: registry position plus the stamp the node
/// was created under. A recovery bumps the tape's stamp, so handles from
/// before it no longer match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: usize,
    pub(crate) stamp: u64,
}

impl NodeId {
    pub fn index(&self) -> usize {
        self.index
    }
}

/* ═══════════════════════  UNARY OPERATORS  ═════════════════════════ */

macro_rules! unary_ops {
    ($($name:ident => $eval:expr, $d:expr;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum UnaryOp {
            $($name),*
        }

        impl UnaryOp {
            #[inline]
            pub fn eval(self, x: f64) -> f64 {
                match self {
                    $(UnaryOp::$name => ($eval)(x)),*
                }
            }

            /// Local partial, given the operand `x` and the result `v`.
            #[inline]
            pub fn deriv(self, x: f64, v: f64) -> f64 {
                match self {
                    $(UnaryOp::$name => ($d)(x, v)),*
                }
            }
        }
    };
}

unary_ops! {
    Identity => |x: f64| x, |_x: f64, _v: f64| 1.0;
    Neg => |x: f64| -x, |_x: f64, _v: f64| -1.0;
    Exp => f64::exp, |_x: f64, v: f64| v;
    Ln => f64::ln, |x: f64, _v: f64| 1.0 / x;
    Log10 => f64::log10, |x: f64, _v: f64| 1.0 / (x * LN_10);
    Sqrt => f64::sqrt, |_x: f64, v: f64| 0.5 / v;
    Cbrt => f64::cbrt, |_x: f64, v: f64| 1.0 / (3.0 * v * v);
    Sin => f64::sin, |x: f64, _v: f64| x.cos();
    Cos => f64::cos, |x: f64, _v: f64| -x.sin();
    Tan => f64::tan, |_x: f64, v: f64| 1.0 + v * v;
    Asin => f64::asin, |x: f64, _v: f64| 1.0 / (1.0 - x * x).sqrt();
    Acos => f64::acos, |x: f64, _v: f64| -1.0 / (1.0 - x * x).sqrt();
    Atan => f64::atan, |x: f64, _v: f64| 1.0 / (1.0 + x * x);
    Sinh => f64::sinh, |x: f64, _v: f64| x.cosh();
    Cosh => f64::cosh, |x: f64, _v: f64| x.sinh();
    Tanh => f64::tanh, |_x: f64, v: f64| 1.0 - v * v;
    Abs => f64::abs, |x: f64, _v: f64| if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else if x == 0.0 {
        0.0
    } else {
        f64::NAN
    };
}

/* ═══════════════════════  BINARY OPERATORS  ════════════════════════ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Atan2,
    Hypot,
    Fmod,
}

impl BinaryOp {
    #[inline]
    pub fn eval(self, l: f64, r: f64) -> f64 {
        match self {
            BinaryOp::Add => l + r,
            BinaryOp::Sub => l - r,
            BinaryOp::Mul => l * r,
            BinaryOp::Div => l / r,
            BinaryOp::Pow => l.powf(r),
            BinaryOp::Atan2 => l.atan2(r),
            BinaryOp::Hypot => l.hypot(r),
            BinaryOp::Fmod => l % r,
        }
    }

    /// ∂f/∂l at `(l, r)`, with `v = f(l, r)`.
    #[inline]
    pub fn d_left(self, l: f64, r: f64, v: f64) -> f64 {
        match self {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Fmod => 1.0,
            BinaryOp::Mul => r,
            BinaryOp::Div => 1.0 / r,
            BinaryOp::Pow => r * l.powf(r - 1.0),
            BinaryOp::Atan2 => r / (l * l + r * r),
            BinaryOp::Hypot => l / v,
        }
    }

    /// ∂f/∂r at `(l, r)`, with `v = f(l, r)`.
    #[inline]
    pub fn d_right(self, l: f64, r: f64, v: f64) -> f64 {
        match self {
            BinaryOp::Add => 1.0,
            BinaryOp::Sub => -1.0,
            BinaryOp::Mul => l,
            BinaryOp::Div => -v / r,
            BinaryOp::Pow => v * l.ln(),
            BinaryOp::Atan2 => -l / (l * l + r * r),
            BinaryOp::Hypot => r / v,
            BinaryOp::Fmod => -(l / r).trunc(),
        }
    }
}

/* ═══════════════════════  TERNARY OPERATORS  ═══════════════════════ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TernaryOp {
    /// `a * b + c`
    Fma,
    /// `ln(a * exp(b) + (1 - a) * exp(c))`
    LogMix,
}

impl TernaryOp {
    pub fn eval(self, a: f64, b: f64, c: f64) -> f64 {
        match self {
            TernaryOp::Fma => a.mul_add(b, c),
            TernaryOp::LogMix => {
                let m = b.max(c);
                m + (a * (b - m).exp() + (1.0 - a) * (c - m).exp()).ln()
            }
        }
    }

    /// Partials with respect to `(a, b, c)`, with `v = f(a, b, c)`.
    pub fn partials(self, a: f64, b: f64, c: f64, v: f64) -> [f64; 3] {
        match self {
            TernaryOp::Fma => [b, a, 1.0],
            TernaryOp::LogMix => {
                let eb = (b - v).exp();
                let ec = (c - v).exp();
                [eb - ec, a * eb, (1.0 - a) * ec]
            }
        }
    }
}

/// Operand of a mixed-arity node: either another node or a constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Var(usize),
    Const(f64),
}

/// What a node does during the backward pass. Node operands are registry
/// positions, always strictly smaller than the position of the node itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    /// Inputs, constants and operations with a zero derivative.
    Leaf,
    Unary(UnaryOp, usize),
    Binary(BinaryOp, usize, usize),
    BinaryVarConst(BinaryOp, usize, f64),
    BinaryConstVar(BinaryOp, f64, usize),
    Ternary(TernaryOp, [Operand; 3]),
    /// Sum of the nodes in the operand span.
    Sum(Span),
    /// Dot product of two operand spans.
    DotProduct(Span, Span),
    /// Dot product of an operand span with a constant span.
    DotProductConst(Span, Span),
    /// Operand span with matching precomputed partials (constant span).
    Precomputed(Span, Span),
}

/// One vertex of the graph. Plain data: the arena never runs destructors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vari {
    pub value: f64,
    pub adjoint: f64,
    pub(crate) op: Op,
    pub(crate) stamp: u64,
}

impl Vari {
    pub(crate) fn new(value: f64, op: Op, stamp: u64) -> Self {
        Self {
            value,
            adjoint: 0.0,
            op,
            stamp,
        }
    }

    pub fn op(&self) -> &Op {
        &self.op
    }
}
