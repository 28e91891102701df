pub use crate::{
    math::ad::{
        dual::Dual,
        functor::{
            derivative, finite_diff_gradient, gradient, gradient_dot_vector, gradient_fwd,
            hessian, hessian_fwd, hessian_times_vector, jacobian, jacobian_fwd,
            partial_derivative, Hessian,
        },
        node::NodeId,
        tape::{
            free_memory, nested, recover_memory, recover_memory_nested, set_zero_all_adjoints,
            start_nested, NestedScope, Tape, TapeConfig, TapeStats,
        },
        var::Var,
    },
    math::functions::{
        dot_product, dot_product_const, fma, log_mix, log_sum_exp, mean, squared_distance, sum,
        Arg,
    },
    memory::arena::{Arena, ArenaConfig},
    model::indexing::{assign, assign_scalar, rvalue, rvalue_multi},
    optimization::problem::{AdProblem, DerivativeMode, Objective},
    utils::errors::*,
    utils::num::*,
};

#[cfg(feature = "parallel")]
pub use crate::math::ad::functor::par_gradient;
