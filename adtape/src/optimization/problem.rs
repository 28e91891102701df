use argmin::core::{CostFunction, Error, Gradient, Hessian as ArgminHessian};

use crate::math::ad::functor;
use crate::utils::num::Real;

/// Scalar objective written once against [`Real`], so it can be evaluated on
/// plain values, on tape variables and on dual numbers alike.
pub trait Objective {
    fn eval<T: Real>(&self, x: &[T]) -> T;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DerivativeMode {
    /// Gradients by one reverse sweep, Hessians forward-over-reverse.
    #[default]
    Reverse,
    /// Gradients by one forward sweep per input, Hessians forward-over-forward.
    Forward,
}

/// Exposes an [`Objective`] to argmin solvers, with exact derivatives.
#[derive(Debug, Clone)]
pub struct AdProblem<O> {
    objective: O,
    mode: DerivativeMode,
}

impl<O: Objective> AdProblem<O> {
    pub fn new(objective: O) -> Self {
        Self {
            objective,
            mode: DerivativeMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: DerivativeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn objective(&self) -> &O {
        &self.objective
    }

    pub fn mode(&self) -> DerivativeMode {
        self.mode
    }
}

impl<O: Objective> CostFunction for AdProblem<O> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.objective.eval(param.as_slice()))
    }
}

impl<O: Objective> Gradient for AdProblem<O> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, Error> {
        let (_, grad) = match self.mode {
            DerivativeMode::Reverse => functor::gradient(|x| self.objective.eval(x), param)?,
            DerivativeMode::Forward => functor::gradient_fwd(|x| self.objective.eval(x), param),
        };
        Ok(grad)
    }
}

impl<O: Objective> ArgminHessian for AdProblem<O> {
    type Param = Vec<f64>;
    type Hessian = Vec<Vec<f64>>;

    fn hessian(&self, param: &Self::Param) -> Result<Self::Hessian, Error> {
        let h = match self.mode {
            DerivativeMode::Reverse => functor::hessian(|x| self.objective.eval(x), param)?,
            DerivativeMode::Forward => functor::hessian_fwd(|x| self.objective.eval(x), param),
        };
        log::trace!("problem: hessian at {:?} = {:?}", param, h.hessian);
        Ok(h.hessian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Rosenbrock {
        a: f64,
        b: f64,
    }

    impl Objective for Rosenbrock {
        fn eval<T: Real>(&self, x: &[T]) -> T {
            let d = T::sub_from_const(self.a, x[0]);
            let e = x[1] - x[0] * x[0];
            d * d + e * e * self.b
        }
    }

    fn problem(mode: DerivativeMode) -> AdProblem<Rosenbrock> {
        AdProblem::new(Rosenbrock { a: 1.0, b: 100.0 }).with_mode(mode)
    }

    #[test]
    fn derivatives_match_closed_form() {
        for mode in [DerivativeMode::Reverse, DerivativeMode::Forward] {
            let p = problem(mode);
            let x = vec![-1.2, 1.0];
            assert_relative_eq!(p.cost(&x).unwrap(), 4.84 + 100.0 * 0.44 * 0.44, epsilon = 1e-12);
            let g = p.gradient(&x).unwrap();
            assert_relative_eq!(g[0], -215.6, epsilon = 1e-9);
            assert_relative_eq!(g[1], -88.0, epsilon = 1e-9);
            let h = p.hessian(&vec![1.0, 1.0]).unwrap();
            assert_eq!(h, vec![vec![802.0, -400.0], vec![-400.0, 200.0]]);
        }
    }

    #[test]
    fn newton_steps_reach_the_minimum() {
        let p = problem(DerivativeMode::Reverse);
        let mut x = vec![-1.2, 1.0];
        for _ in 0..50 {
            let g = p.gradient(&x).unwrap();
            let h = p.hessian(&x).unwrap();
            let det = h[0][0] * h[1][1] - h[0][1] * h[1][0];
            let dx = (h[1][1] * g[0] - h[0][1] * g[1]) / det;
            let dy = (h[0][0] * g[1] - h[1][0] * g[0]) / det;
            x = vec![x[0] - dx, x[1] - dy];
        }
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-8);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-8);
        assert!(p.cost(&x).unwrap() < 1e-12);
    }
}
