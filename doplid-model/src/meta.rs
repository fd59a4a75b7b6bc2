//!
//! This module contains static metadata about the supported lidar instrument families. The
//! physical constants here are the only process-wide configuration; they never change at runtime.
//!

mod instrument;
pub use instrument::*;
