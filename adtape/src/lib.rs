//! Reverse-mode automatic differentiation on an arena-backed tape, with
//! nestable forward-mode dual numbers for higher-order derivatives.

pub mod math;
pub mod memory;
pub mod model;
pub mod optimization;
pub mod prelude;
pub mod utils;
