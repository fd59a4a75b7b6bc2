//!
//! Contains the Result and Error types for product model operations.
//!

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("array '{field}' has length {actual}, expected {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("array '{field}' has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        field: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
    #[error("time is not strictly increasing at index {index}")]
    NonMonotonicTime { index: usize },
    #[error("wavelength must be positive, got {0}")]
    InvalidWavelength(f64),
    #[error("system id must be a non-empty string")]
    EmptySystemId,
    #[error("elevation {0} degrees is outside [-90, 90]")]
    InvalidElevation(f64),
}
