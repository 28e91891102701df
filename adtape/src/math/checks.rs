//! Argument validation shared by the vector functions and the indexing layer.
//!
//! Every check runs before a node is recorded, so a rejected call leaves the
//! tape exactly as it was.

use crate::utils::errors::{AdError, Result};

pub fn check_matching_sizes(function: &str, expected: usize, found: usize) -> Result<()> {
    if expected != found {
        return Err(AdError::InvalidArgument(format!(
            "{}: size mismatch, expected {} but found {}",
            function, expected, found
        )));
    }
    Ok(())
}

pub fn check_nonzero_size(function: &str, size: usize) -> Result<()> {
    if size == 0 {
        return Err(AdError::InvalidArgument(format!(
            "{}: container must not be empty",
            function
        )));
    }
    Ok(())
}

/// Zero-based `index` must be below `size`.
pub fn check_range(function: &str, index: usize, size: usize) -> Result<()> {
    if index >= size {
        return Err(AdError::OutOfRange {
            function: function.to_string(),
            index,
            size,
        });
    }
    Ok(())
}

pub fn check_positive_finite(function: &str, name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(AdError::DomainError(format!(
            "{}: {} must be positive and finite, found {}",
            function, name, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checks_report_the_failing_call() {
        assert!(check_matching_sizes("dot", 3, 3).is_ok());
        let err = check_matching_sizes("dot", 3, 2).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid argument: dot: size mismatch, expected 3 but found 2"
        );
        assert_eq!(
            check_range("rvalue", 4, 4),
            Err(AdError::OutOfRange {
                function: "rvalue".into(),
                index: 4,
                size: 4
            })
        );
        assert!(check_range("rvalue", 3, 4).is_ok());
        assert!(check_nonzero_size("mean", 0).is_err());
        assert!(check_positive_finite("fd", "epsilon", 1e-6).is_ok());
        assert!(matches!(
            check_positive_finite("fd", "epsilon", f64::NAN),
            Err(AdError::DomainError(_))
        ));
        assert!(check_positive_finite("fd", "epsilon", -1.0).is_err());
    }
}
