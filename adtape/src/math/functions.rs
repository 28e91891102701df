//! Vector and ternary functions recorded as single tape nodes.

use crate::math::ad::node::{Op, Operand, TernaryOp};
use crate::math::ad::var::{indices, Var};
use crate::math::checks::{check_matching_sizes, check_nonzero_size};
use crate::utils::errors::{AdError, Result};

/// Scalar argument of a mixed function: a variable or a plain constant.
#[derive(Debug, Clone, Copy)]
pub enum Arg {
    Var(Var),
    Const(f64),
}

impl Arg {
    pub fn value(&self) -> f64 {
        match self {
            Arg::Var(v) => v.value(),
            Arg::Const(c) => *c,
        }
    }
}

impl From<Var> for Arg {
    fn from(v: Var) -> Self {
        Arg::Var(v)
    }
}

impl From<f64> for Arg {
    fn from(c: f64) -> Self {
        Arg::Const(c)
    }
}

fn ternary(op: TernaryOp, args: [Arg; 3]) -> Var {
    let value = op.eval(args[0].value(), args[1].value(), args[2].value());
    let vars: Vec<Var> = args
        .iter()
        .filter_map(|a| match a {
            Arg::Var(v) => Some(*v),
            Arg::Const(_) => None,
        })
        .collect();
    if vars.is_empty() {
        return Var::new(value);
    }
    let operands = args.map(|a| match a {
        Arg::Var(v) => Operand::Var(v.id().index()),
        Arg::Const(c) => Operand::Const(c),
    });
    Var::record_with(&vars, value, |_| Ok(Op::Ternary(op, operands)))
}

/// `a * b + c`
pub fn fma(a: impl Into<Arg>, b: impl Into<Arg>, c: impl Into<Arg>) -> Var {
    ternary(TernaryOp::Fma, [a.into(), b.into(), c.into()])
}

/// `ln(theta * exp(lambda1) + (1 - theta) * exp(lambda2))` for a mixing
/// weight `theta` in `[0, 1]`.
pub fn log_mix(theta: impl Into<Arg>, lambda1: impl Into<Arg>, lambda2: impl Into<Arg>) -> Result<Var> {
    let theta = theta.into();
    let t = theta.value();
    if !(0.0..=1.0).contains(&t) {
        return Err(AdError::DomainError(format!(
            "log_mix: theta must be in [0, 1], found {}",
            t
        )));
    }
    Ok(ternary(TernaryOp::LogMix, [theta, lambda1.into(), lambda2.into()]))
}

pub fn sum(xs: &[Var]) -> Var {
    let total = xs.iter().map(Var::value).sum();
    let idx = indices(xs);
    Var::record_with(xs, total, |t| Ok(Op::Sum(t.push_operands(&idx)?)))
}

pub fn mean(xs: &[Var]) -> Result<Var> {
    check_nonzero_size("mean", xs.len())?;
    let n = xs.len() as f64;
    let m = xs.iter().map(Var::value).sum::<f64>() / n;
    Var::precomputed(m, xs, &vec![1.0 / n; xs.len()])
}

pub fn dot_product(a: &[Var], b: &[Var]) -> Result<Var> {
    check_matching_sizes("dot_product", a.len(), b.len())?;
    let value = a.iter().zip(b).map(|(x, y)| x.value() * y.value()).sum();
    let (ia, ib) = (indices(a), indices(b));
    let operands: Vec<Var> = a.iter().chain(b).copied().collect();
    Ok(Var::record_with(&operands, value, |t| {
        let sa = t.push_operands(&ia)?;
        let sb = t.push_operands(&ib)?;
        Ok(Op::DotProduct(sa, sb))
    }))
}

pub fn dot_product_const(a: &[Var], c: &[f64]) -> Result<Var> {
    check_matching_sizes("dot_product_const", a.len(), c.len())?;
    let value = a.iter().zip(c).map(|(x, k)| x.value() * k).sum();
    let idx = indices(a);
    Ok(Var::record_with(a, value, |t| {
        let span = t.push_operands(&idx)?;
        let cs = t.push_constants(c)?;
        Ok(Op::DotProductConst(span, cs))
    }))
}

/// Numerically stable `ln(sum(exp(x)))`.
pub fn log_sum_exp(xs: &[Var]) -> Result<Var> {
    check_nonzero_size("log_sum_exp", xs.len())?;
    let m = xs.iter().map(Var::value).fold(f64::NEG_INFINITY, f64::max);
    if m == f64::NEG_INFINITY {
        return Var::precomputed(m, xs, &vec![0.0; xs.len()]);
    }
    let value = m + xs.iter().map(|x| (x.value() - m).exp()).sum::<f64>().ln();
    let partials: Vec<f64> = xs.iter().map(|x| (x.value() - value).exp()).collect();
    Var::precomputed(value, xs, &partials)
}

/// `sum((a - b)^2)`
pub fn squared_distance(a: &[Var], b: &[Var]) -> Result<Var> {
    check_matching_sizes("squared_distance", a.len(), b.len())?;
    let diffs: Vec<f64> = a.iter().zip(b).map(|(x, y)| x.value() - y.value()).collect();
    let value = diffs.iter().map(|d| d * d).sum();
    let partials: Vec<f64> = diffs
        .iter()
        .map(|d| 2.0 * d)
        .chain(diffs.iter().map(|d| -2.0 * d))
        .collect();
    let operands: Vec<Var> = a.iter().chain(b).copied().collect();
    Var::precomputed(value, &operands, &partials)
}
