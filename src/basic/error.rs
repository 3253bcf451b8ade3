use nalgebra::DVector;
use num_complex::Complex64;
use thiserror::Error;

/// Errors raised by the power flow core.
///
/// Structural problems (singular matrices, malformed partitions, bad dimensions)
/// are fatal to a solve. `NonConvergence` carries the last iterate so callers can
/// still inspect a near-solution.
#[derive(Debug, Error)]
pub enum PowerFlowError {
    #[error("singular matrix while {context}")]
    SingularMatrix { context: String },

    #[error("malformed bus partition: {0}")]
    MalformedPartition(String),

    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid branch {index}: {reason}")]
    InvalidBranch { index: usize, reason: String },

    #[error("invalid reactive limit at bus {bus}: {reason}")]
    InvalidLimit { bus: usize, reason: &'static str },

    #[error("did not converge after {iterations} iterations (mismatch {mismatch:e})")]
    NonConvergence {
        iterations: usize,
        mismatch: f64,
        last: Box<DVector<Complex64>>,
    },
}

impl PowerFlowError {
    pub(crate) fn singular(context: impl Into<String>) -> Self {
        Self::SingularMatrix {
            context: context.into(),
        }
    }
}

/// Failure of a series accelerator for a single bus.
///
/// Localized: the solve continues with plain summation for that bus.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccelerationError {
    #[error("no coefficients to accelerate")]
    TooFewCoefficients,

    #[error("ill-conditioned acceleration: {reason}")]
    IllConditioned { reason: &'static str },
}
