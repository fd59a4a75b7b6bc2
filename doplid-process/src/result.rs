//!
//! Contains the Result and Error types for product construction.
//!
//! The error kinds mirror the failure modes of the pipeline: unusable input (`NoData`),
//! malformed raw files (`RawParsing`), structural disagreement between inputs (`Shape`),
//! violated caller contracts (`InvalidArgument`) and non-finite fitting results (`Numerical`).
//!

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("no data: {0}")]
    NoData(String),
    #[error("raw parsing error")]
    RawParsing(#[from] doplid_decode::result::Error),
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("numerical error: {0}")]
    Numerical(String),
    #[error("product validation error")]
    Model(#[from] doplid_model::result::Error),
}
