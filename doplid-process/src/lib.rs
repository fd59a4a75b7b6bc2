//!
//! # doplid-process
//! The processing core that turns raw Doppler lidar files into science products: the
//! vertical-stare product (calibrated backscatter, radial velocity and a noise mask), the
//! depolarisation product from co-/cross-polarised stares, the horizontal-wind product from
//! conical scans, and the turbulent-kinetic-energy dissipation rate.
//!
//! Product construction is a pure function from raw records and options to an immutable
//! product struct; no state is shared between constructions. Gate-independent work (per-scan
//! least squares, rolling reductions) is parallelised with `rayon`, which never changes the
//! results.
//!

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::correctness)]
#![allow(clippy::too_many_arguments)]

pub mod background;
pub mod kernel;
pub mod noise;
pub mod result;
pub mod stare;
pub mod stare_depol;
pub mod turbulence;
pub mod wind;

mod cluster;
mod filters;
mod interpolate;
mod optimize;
mod select;

pub use background::{BgCorrectionMethod, BgFitMethod};
pub use stare::{stare_from_halo, stare_from_windcube};
pub use stare_depol::stare_depol;
pub use turbulence::{turbulence, turbulence_from_products, HorizontalWind, TurbulenceOptions, VerticalWind};
pub use wind::{wind_from_halo, wind_from_windcube, wind_from_wls70, WindOptions};
