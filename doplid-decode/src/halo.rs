//!
//! Readers for the file families produced by Halo Photonics StreamLine lidars: `.hpl` profile
//! files, `Background_*.txt` background-signal files and `system_parameters_*.txt` housekeeping
//! files.
//!

pub mod background;
pub mod hpl;
pub mod system_parameters;

pub use background::HaloBg;
pub use hpl::{HaloHpl, HaloHplHeader, MergeKey};
pub use system_parameters::HaloSysParams;
