//! Error types for the fluid core.
//!
//! Only programmer errors and rejected configuration surface as [`FluidError`].
//! Capacity overflow during a step is not an error: it truncates and is counted
//! in [`OverflowCounters`](crate::fluid::simulation::OverflowCounters).

use thiserror::Error;

use crate::fluid::boundary::ColliderHandle;

/// Errors returned by fallible fluid operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FluidError {
    /// A configuration value is out of its accepted range.
    #[error("invalid fluid configuration: {0}")]
    InvalidConfig(String),

    /// Collider shape parameters or transform cannot be used.
    #[error("invalid collider: {0}")]
    InvalidColliderShape(String),

    /// The handle does not refer to a registered collider.
    #[error("unknown collider handle {0:?}")]
    UnknownCollider(ColliderHandle),

    /// A particle index past the active range.
    #[error("particle index {index} out of range (active particles: {count})")]
    ParticleOutOfRange { index: usize, count: usize },

    /// Two parallel input arrays disagree in length.
    #[error("mismatched {what} lengths: expected {expected}, got {actual}")]
    MismatchedLengths {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Result alias used across the crate.
pub type FluidResult<T> = Result<T, FluidError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_problem() {
        let err = FluidError::MismatchedLengths {
            what: "velocity",
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "mismatched velocity lengths: expected 3, got 2"
        );

        let err = FluidError::ParticleOutOfRange { index: 7, count: 4 };
        assert!(err.to_string().contains("7"));
        assert!(err.to_string().contains("4"));
    }
}
