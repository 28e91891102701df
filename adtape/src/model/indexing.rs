//! Reading and assigning elements of containers of scalars.
//!
//! Indices are zero-based. Every range and shape check runs before anything
//! is written or recorded, so a failed call leaves both the target and the
//! tape unchanged.

use crate::math::ad::var::Var;
use crate::math::checks::{check_matching_sizes, check_range};
use crate::utils::errors::Result;

/// Single element. Reading records nothing: the handle is copied.
pub fn rvalue<T: Copy>(xs: &[T], index: usize) -> Result<T> {
    check_range("rvalue", index, xs.len())?;
    Ok(xs[index])
}

/// Elements at `indices`, in that order; repeats are allowed.
pub fn rvalue_multi<T: Copy>(xs: &[T], indices: &[usize]) -> Result<Vec<T>> {
    for &i in indices {
        check_range("rvalue_multi", i, xs.len())?;
    }
    Ok(indices.iter().map(|&i| xs[i]).collect())
}

/// `target[indices[k]] = values[k]`. Each touched element gets a fresh node
/// whose only partial is a unit partial to the value it was copied from.
pub fn assign(target: &mut [Var], indices: &[usize], values: &[Var]) -> Result<()> {
    check_matching_sizes("assign", indices.len(), values.len())?;
    for &i in indices {
        check_range("assign", i, target.len())?;
    }
    for (&i, v) in indices.iter().zip(values) {
        target[i] = v.identity();
    }
    Ok(())
}

pub fn assign_scalar(target: &mut [Var], index: usize, value: Var) -> Result<()> {
    check_range("assign_scalar", index, target.len())?;
    target[index] = value.identity();
    Ok(())
}
