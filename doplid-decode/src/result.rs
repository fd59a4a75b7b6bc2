//!
//! Contains the Result and Error types for raw-file parsing.
//!

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("raw file IO error")]
    FileError(#[from] std::io::Error),
    #[error("cannot find header divider '****' in {filename}")]
    MissingHeaderDivider { filename: String },
    #[error("missing header key '{key}' in {filename}")]
    MissingHeaderKey { key: String, filename: String },
    #[error("unexpected header row '{row}' in {filename}")]
    UnexpectedHeaderRow { row: String, filename: String },
    #[error("invalid number '{value}' for {what} in {filename}")]
    InvalidNumber {
        value: String,
        what: &'static str,
        filename: String,
    },
    #[error("invalid timestamp '{value}' in {filename}")]
    InvalidTimestamp { value: String, filename: String },
    #[error("incoherent range gates in {filename}: gate indices do not run 0..{ngates}")]
    IncoherentGates { filename: String, ngates: usize },
    #[error("inhomogeneous data in {filename}: number of columns changes in the middle of the file")]
    InhomogeneousArray { filename: String },
    #[error("no data found in {filename}")]
    Empty { filename: String },
    #[error("cannot parse datetime from background filename: {filename}")]
    BadBackgroundFilename { filename: String },
    #[error("unexpected system-parameters format in {filename}: {reason}")]
    BadSystemParameters { filename: String, reason: String },
    #[error("NetCDF error in {filename}")]
    NetCdf {
        filename: String,
        #[source]
        source: netcdf::error::Error,
    },
    #[error("missing NetCDF variable '{name}' in {filename}")]
    MissingVariable { name: String, filename: String },
    #[error("missing NetCDF attribute '{name}' in {filename}")]
    MissingAttribute { name: String, filename: String },
    #[error("unexpected dimensions for NetCDF variable '{name}' in {filename}")]
    UnexpectedDimensions { name: String, filename: String },
    #[error("unexpected units '{units}' for NetCDF variable '{name}' in {filename}")]
    UnexpectedUnits {
        units: String,
        name: String,
        filename: String,
    },
    #[error("cannot merge raw records: {reason}")]
    MergeMismatch { reason: String },
}
