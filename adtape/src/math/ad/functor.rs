//! Derivative functionals built on the tape and on dual numbers.
//!
//! The reverse-mode functionals run inside their own nested scope, so they can
//! be called while an outer computation is still live on the same tape and
//! leave it untouched.

use super::dual::Dual;
use super::tape::{self, NestedScope};
use super::var::Var;
use crate::math::checks::{check_matching_sizes, check_positive_finite, check_range};
use crate::utils::errors::Result;
use crate::utils::num::Real;

/// Value, gradient and Hessian of a scalar function at one point.
#[derive(Debug, Clone, PartialEq)]
pub struct Hessian {
    pub value: f64,
    pub gradient: Vec<f64>,
    pub hessian: Vec<Vec<f64>>,
}

/// Value and derivative of a scalar function of one variable, by one forward
/// sweep. `T` may itself carry derivatives: with `T = Var` the returned
/// derivative can be differentiated again on the tape.
pub fn derivative<T, F>(f: F, x: T) -> (T, T)
where
    T: Real,
    F: Fn(Dual<T>) -> Dual<T>,
{
    let y = f(Dual::variable(x));
    (y.val, y.tan)
}

/// Value and `∂f/∂x[n]`, by one forward sweep.
pub fn partial_derivative<F>(f: F, x: &[f64], n: usize) -> Result<(f64, f64)>
where
    F: Fn(&[Dual<f64>]) -> Dual<f64>,
{
    check_range("partial_derivative", n, x.len())?;
    let y = f(&seed(x, n));
    Ok((y.val, y.tan))
}

fn seed(x: &[f64], n: usize) -> Vec<Dual<f64>> {
    x.iter()
        .enumerate()
        .map(|(i, v)| Dual::new(*v, if i == n { 1.0 } else { 0.0 }))
        .collect()
}

/// Value and gradient by one reverse sweep.
pub fn gradient<F>(f: F, x: &[f64]) -> Result<(f64, Vec<f64>)>
where
    F: Fn(&[Var]) -> Var,
{
    let _scope = NestedScope::enter();
    let xs: Vec<Var> = x.iter().map(|v| Var::new(*v)).collect();
    let fx = f(&xs);
    let grad = fx.gradient_no_recover(&xs)?;
    Ok((fx.value(), grad))
}

/// Value and gradient by one forward sweep per input.
pub fn gradient_fwd<F>(f: F, x: &[f64]) -> (f64, Vec<f64>)
where
    F: Fn(&[Dual<f64>]) -> Dual<f64>,
{
    let mut value = f64::NAN;
    let mut grad = Vec::with_capacity(x.len());
    for n in 0..x.len() {
        let y = f(&seed(x, n));
        value = y.val;
        grad.push(y.tan);
    }
    if x.is_empty() {
        value = f(&[]).val;
    }
    (value, grad)
}

/// Values and Jacobian of a vector function, one reverse sweep per output.
pub fn jacobian<F>(f: F, x: &[f64]) -> Result<(Vec<f64>, Vec<Vec<f64>>)>
where
    F: Fn(&[Var]) -> Vec<Var>,
{
    let _scope = NestedScope::enter();
    let xs: Vec<Var> = x.iter().map(|v| Var::new(*v)).collect();
    let fx = f(&xs);
    let values = fx.iter().map(Var::value).collect();
    let jac = tape::jacobian(&fx, &xs)?;
    Ok((values, jac))
}

/// Values and Jacobian of a vector function, one forward sweep per input.
pub fn jacobian_fwd<F>(f: F, x: &[f64]) -> (Vec<f64>, Vec<Vec<f64>>)
where
    F: Fn(&[Dual<f64>]) -> Vec<Dual<f64>>,
{
    let mut values = Vec::new();
    let mut jac: Vec<Vec<f64>> = Vec::new();
    for n in 0..x.len() {
        let ys = f(&seed(x, n));
        if n == 0 {
            values = ys.iter().map(|y| y.val).collect();
            jac = vec![vec![0.0; x.len()]; ys.len()];
        }
        for (row, y) in jac.iter_mut().zip(&ys) {
            row[n] = y.tan;
        }
    }
    if x.is_empty() {
        values = f(&[]).iter().map(|y| y.val).collect();
        jac = vec![Vec::new(); values.len()];
    }
    (values, jac)
}

/// Forward-over-reverse Hessian: one nested reverse sweep per input over
/// `Dual<Var>` arguments.
pub fn hessian<F>(f: F, x: &[f64]) -> Result<Hessian>
where
    F: Fn(&[Dual<Var>]) -> Dual<Var>,
{
    let n = x.len();
    let mut value = f64::NAN;
    let mut grad = vec![0.0; n];
    let mut hess = vec![vec![0.0; n]; n];
    for i in 0..n {
        let _scope = NestedScope::enter();
        let xs: Vec<Dual<Var>> = x
            .iter()
            .enumerate()
            .map(|(j, v)| Dual::new(Var::new(*v), Var::new(if i == j { 1.0 } else { 0.0 })))
            .collect();
        let fx = f(&xs);
        fx.tan.backward()?;
        for (j, xj) in xs.iter().enumerate() {
            hess[i][j] = xj.val.adjoint()?;
        }
        grad[i] = fx.tan.value();
        value = fx.val.value();
    }
    if n == 0 {
        let _scope = NestedScope::enter();
        value = f(&[]).val.value();
    }
    Ok(Hessian {
        value,
        gradient: grad,
        hessian: hess,
    })
}

/// Forward-over-forward Hessian over `Dual<Dual<f64>>`; needs no tape.
pub fn hessian_fwd<F>(f: F, x: &[f64]) -> Hessian
where
    F: Fn(&[Dual<Dual<f64>>]) -> Dual<Dual<f64>>,
{
    let n = x.len();
    let mut value = f64::NAN;
    let mut grad = vec![0.0; n];
    let mut hess = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let xs: Vec<Dual<Dual<f64>>> = x
                .iter()
                .enumerate()
                .map(|(k, v)| {
                    Dual::new(
                        Dual::new(*v, if k == j { 1.0 } else { 0.0 }),
                        Dual::new(if k == i { 1.0 } else { 0.0 }, 0.0),
                    )
                })
                .collect();
            let fx = f(&xs);
            hess[i][j] = fx.tan_tan();
            hess[j][i] = hess[i][j];
            grad[i] = fx.tan_val();
            value = fx.val_val();
        }
    }
    if n == 0 {
        value = f(&[]).val_val();
    }
    Hessian {
        value,
        gradient: grad,
        hessian: hess,
    }
}

/// Value and directional derivative `∇f(x) · v`, by one forward sweep.
pub fn gradient_dot_vector<F>(f: F, x: &[f64], v: &[f64]) -> Result<(f64, f64)>
where
    F: Fn(&[Dual<f64>]) -> Dual<f64>,
{
    check_matching_sizes("gradient_dot_vector", x.len(), v.len())?;
    let xs: Vec<Dual<f64>> = x.iter().zip(v).map(|(a, b)| Dual::new(*a, *b)).collect();
    let y = f(&xs);
    Ok((y.val, y.tan))
}

/// Value and Hessian-vector product `H(x) v`, forward-over-reverse in a
/// single reverse sweep.
pub fn hessian_times_vector<F>(f: F, x: &[f64], v: &[f64]) -> Result<(f64, Vec<f64>)>
where
    F: Fn(&[Dual<Var>]) -> Dual<Var>,
{
    check_matching_sizes("hessian_times_vector", x.len(), v.len())?;
    let _scope = NestedScope::enter();
    let xs: Vec<Dual<Var>> = x
        .iter()
        .zip(v)
        .map(|(a, b)| Dual::new(Var::new(*a), Var::new(*b)))
        .collect();
    let fx = f(&xs);
    fx.tan.backward()?;
    let hv = xs
        .iter()
        .map(|xi| xi.val.adjoint())
        .collect::<Result<Vec<f64>>>()?;
    Ok((fx.val.value(), hv))
}

/// Central finite differences, for checking the other functionals.
pub fn finite_diff_gradient<F>(f: F, x: &[f64], epsilon: f64) -> Result<(f64, Vec<f64>)>
where
    F: Fn(&[f64]) -> f64,
{
    check_positive_finite("finite_diff_gradient", "epsilon", epsilon)?;
    let mut xs = x.to_vec();
    let mut grad = Vec::with_capacity(x.len());
    for i in 0..x.len() {
        xs[i] = x[i] + epsilon;
        let up = f(&xs);
        xs[i] = x[i] - epsilon;
        let down = f(&xs);
        xs[i] = x[i];
        grad.push((up - down) / (2.0 * epsilon));
    }
    Ok((f(x), grad))
}

/// Gradients at many points in parallel. Each rayon worker records on its
/// own thread-local tape.
#[cfg(feature = "parallel")]
pub fn par_gradient<F>(f: F, points: &[Vec<f64>]) -> Result<Vec<(f64, Vec<f64>)>>
where
    F: Fn(&[Var]) -> Var + Sync,
{
    use rayon::prelude::*;
    points.par_iter().map(|x| gradient(&f, x)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::ad::tape::{recover_memory, stack_len};
    use crate::utils::errors::AdError;
    use crate::utils::num::Real;
    use approx::assert_relative_eq;

    fn rosenbrock<T: Real>(x: &[T]) -> T {
        let a = T::sub_from_const(1.0, x[0]);
        let b = x[1] - x[0] * x[0];
        a * a + b * b * 100.0
    }

    fn mixed<T: Real>(x: &[T]) -> T {
        x[0].exp() * x[1].sin() + x[0] * x[1] * x[1]
    }

    #[test]
    fn derivative_of_scalar_function() {
        let (v, d) = derivative(|x: Dual<f64>| x.powi(3) - x * 2.0, 2.0);
        assert_eq!(v, 4.0);
        assert_eq!(d, 10.0);
        let (_, p) = partial_derivative(mixed, &[0.5, 2.0], 1).unwrap();
        assert_relative_eq!(p, 0.5f64.exp() * 2f64.cos() + 2.0 * 0.5 * 2.0, epsilon = 1e-12);
        assert_eq!(
            partial_derivative(mixed, &[0.5, 2.0], 2),
            Err(AdError::OutOfRange {
                function: "partial_derivative".into(),
                index: 2,
                size: 2
            })
        );
    }

    #[test]
    fn derivative_over_var_can_be_differentiated_again() {
        recover_memory().unwrap();
        let x = Var::new(2.0);
        let (v, d) = derivative(|y: Dual<Var>| y.powi(3) - y * 2.0, x);
        assert_eq!(v.value(), 4.0);
        assert_eq!(d.value(), 10.0);
        assert_eq!(d.gradient(&[x]).unwrap(), vec![12.0]);

        let x = Dual::variable(2.0);
        let (_, d) = derivative(|y: Dual<Dual<f64>>| y.powi(3), x);
        assert_eq!((d.val, d.tan), (12.0, 12.0));
    }

    #[test]
    fn reverse_and_forward_gradients_agree() {
        recover_memory().unwrap();
        let x = [0.3, -1.2];
        let (v, g) = gradient(mixed, &x).unwrap();
        let (vf, gf) = gradient_fwd(mixed, &x);
        let (vd, gd) = finite_diff_gradient(mixed, &x, 1e-6).unwrap();
        assert_relative_eq!(v, vf);
        assert_relative_eq!(v, vd);
        for k in 0..2 {
            assert_relative_eq!(g[k], gf[k], epsilon = 1e-12);
            assert_relative_eq!(g[k], gd[k], epsilon = 1e-6);
        }
        assert_eq!(stack_len(), 0);
    }

    #[test]
    fn functionals_leave_outer_computation_alive() {
        recover_memory().unwrap();
        let a = Var::new(2.0);
        let outer = a * a;
        let (_, g) = gradient(rosenbrock, &[1.0, 1.0]).unwrap();
        assert_eq!(g, vec![0.0, 0.0]);
        assert!(outer.is_live());
        assert_eq!(stack_len(), 2);
        assert_eq!(outer.gradient(&[a]).unwrap(), vec![4.0]);
    }

    #[test]
    fn jacobians_in_both_modes() {
        recover_memory().unwrap();
        fn f<T: Real>(x: &[T]) -> Vec<T> {
            vec![x[0] * x[1], x[0] + x[1].exp(), x[1].sin()]
        }
        let x = [1.5, 0.5];
        let (vals, j) = jacobian(f, &x).unwrap();
        let (vals_f, j_f) = jacobian_fwd(f, &x);
        assert_eq!(vals, vals_f);
        let expected = [
            [0.5, 1.5],
            [1.0, 0.5f64.exp()],
            [0.0, 0.5f64.cos()],
        ];
        for r in 0..3 {
            for c in 0..2 {
                assert_relative_eq!(j[r][c], expected[r][c], epsilon = 1e-12);
                assert_relative_eq!(j_f[r][c], expected[r][c], epsilon = 1e-12);
            }
        }
        assert_eq!(stack_len(), 0);
    }

    #[test]
    fn hessian_of_rosenbrock() {
        recover_memory().unwrap();
        let h = hessian(rosenbrock, &[1.0, 1.0]).unwrap();
        assert_eq!(h.value, 0.0);
        assert_eq!(h.gradient, vec![0.0, 0.0]);
        assert_eq!(h.hessian, vec![vec![802.0, -400.0], vec![-400.0, 200.0]]);
        let hf = hessian_fwd(rosenbrock, &[1.0, 1.0]);
        assert_eq!(hf, h);
        assert_eq!(stack_len(), 0);
    }

    fn square_plus_cross<T: Real>(x: &[T]) -> T {
        x[0].powf(T::from(2.0)) + x[0] * x[1]
    }

    #[test]
    fn hessian_through_constant_power_of_negative_base() {
        recover_memory().unwrap();
        let x = [-2.0, 0.5];
        let expected = Hessian {
            value: 4.0 - 1.0,
            gradient: vec![-3.5, -2.0],
            hessian: vec![vec![2.0, 1.0], vec![1.0, 0.0]],
        };
        assert_eq!(hessian(square_plus_cross, &x).unwrap(), expected);
        assert_eq!(hessian_fwd(square_plus_cross, &x), expected);
        let h = hessian(|x| x[0].powf_const(2.0), &[0.0]).unwrap();
        assert_eq!((h.gradient[0], h.hessian[0][0]), (0.0, 2.0));
        assert_eq!(stack_len(), 0);
    }

    #[test]
    fn mixed_hessians_agree() {
        recover_memory().unwrap();
        let x = [0.3, -1.2];
        let h = hessian(mixed, &x).unwrap();
        let hf = hessian_fwd(mixed, &x);
        for i in 0..2 {
            assert_relative_eq!(h.gradient[i], hf.gradient[i], epsilon = 1e-12);
            for j in 0..2 {
                assert_relative_eq!(h.hessian[i][j], hf.hessian[i][j], epsilon = 1e-12);
            }
        }
        assert_relative_eq!(h.hessian[0][1], h.hessian[1][0], epsilon = 1e-12);
    }

    #[test]
    fn directional_products() {
        recover_memory().unwrap();
        let x = [1.0, 1.0];
        let v = [1.0, -2.0];
        let (_, gv) = gradient_dot_vector(rosenbrock, &x, &v).unwrap();
        assert_eq!(gv, 0.0);
        let (_, hv) = hessian_times_vector(rosenbrock, &x, &v).unwrap();
        assert_eq!(hv, vec![802.0 + 800.0, -400.0 - 400.0]);
        assert!(hessian_times_vector(rosenbrock, &x, &[1.0]).is_err());
        assert_eq!(stack_len(), 0);
    }

    #[test]
    fn finite_differences_reject_bad_epsilon() {
        assert!(matches!(
            finite_diff_gradient(mixed, &[1.0], 0.0),
            Err(AdError::DomainError(_))
        ));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn parallel_gradients_match_serial() {
        let points: Vec<Vec<f64>> = (0..32).map(|i| vec![i as f64 * 0.1, 1.0 - i as f64 * 0.05]).collect();
        let par = par_gradient(mixed::<Var>, &points).unwrap();
        recover_memory().unwrap();
        for (p, (v, g)) in points.iter().zip(&par) {
            let (vs, gs) = gradient(mixed, p).unwrap();
            assert_eq!(*v, vs);
            assert_eq!(*g, gs);
        }
    }
}
