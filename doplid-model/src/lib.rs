//!
//! # doplid-model
//! A common model for representing Doppler lidar products. The products are built on a regular
//! (time, range) grid: a vertical-stare product with attenuated backscatter and radial velocity,
//! a depolarisation product derived from co- and cross-polarised stares, a horizontal-wind
//! product retrieved from conical scans, and a turbulence product with the kinetic energy
//! dissipation rate.
//!
//! Products validate their structural invariants on construction and are immutable afterwards.
//!
//! An optional `serde` feature implements `serde::Serialize` and `serde::Deserialize` for all
//! products.
//!

#![forbid(unsafe_code)]
#![warn(clippy::correctness)]
#![allow(clippy::too_many_arguments)]

pub mod data;
pub mod meta;
pub mod result;
