#![forbid(unsafe_code)]
#![warn(clippy::correctness)]

//! # doplid
//!
//! Doppler lidar processing: readers for Halo, WindCube and WLS70/77 raw files, a common
//! product model, and the processing core deriving stare, depolarisation, wind and
//! turbulence products.
//!
//! The sub-crates can be enabled individually:
//! - `model`: product structs and instrument metadata
//! - `decode`: raw-file readers
//! - `process`: product construction (implies `model` and `decode`)
//!

#[cfg(feature = "model")]
pub use doplid_model as model;

#[cfg(feature = "decode")]
pub use doplid_decode as decode;

#[cfg(feature = "process")]
pub use doplid_process as process;
