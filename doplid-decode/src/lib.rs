//!
//! # doplid-decode
//! Raw-file readers for Doppler lidar instruments: Halo Photonics `.hpl` profile files,
//! Halo background and system-parameter files, WindCube NetCDF sweep files (fixed and
//! VAD/DBS geometries) and WLS70/WLS77 row-oriented ASCII files.
//!
//! Each reader turns a single in-memory byte source into a typed raw record holding the
//! time axis (microseconds since the Unix epoch), the range grid and the measured 2-D
//! fields. The readers are tolerant to the real-world defects of these formats — trailing
//! partial profiles, glued columns, mixed timestamp conventions — and reject files whose
//! defects cannot be recovered with a structured parsing error.
//!
//! Raw records support the normalisation operations the processing layer builds on:
//! sorting by time, removal of non-increasing timesteps, removal of NaN profiles, row
//! selection and homogeneous-file merging.
//!

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::correctness)]

pub mod halo;
pub mod result;
pub mod source;
pub mod windcube;
pub mod wls70;
pub mod wls77;

mod util;
