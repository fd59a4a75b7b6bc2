use crate::data::{
    check_elevations, check_len, check_shape, check_strictly_increasing, micros_to_datetime,
};
use crate::result::{Error, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use std::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A vertical-stare product: attenuated backscatter and radial velocity on a regular
/// (time, range) grid, together with a signal-quality mask. One row is one profile measured at a
/// fixed, near-vertical pointing direction.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Stare {
    time: Vec<i64>,
    radial_distance: Array1<f64>,
    elevation: Array1<f64>,
    beta: Array2<f64>,
    radial_velocity: Array2<f64>,
    mask: Array2<bool>,
    wavelength: f64,
    system_id: String,
}

impl Stare {
    /// Create a new stare product, validating the grid invariants. The mask is widened so that
    /// every non-finite backscatter cell is masked.
    pub fn new(
        time: Vec<i64>,
        radial_distance: Array1<f64>,
        elevation: Array1<f64>,
        beta: Array2<f64>,
        radial_velocity: Array2<f64>,
        mut mask: Array2<bool>,
        wavelength: f64,
        system_id: String,
    ) -> Result<Self> {
        let shape = (time.len(), radial_distance.len());
        check_strictly_increasing(&time)?;
        check_len("elevation", time.len(), elevation.len())?;
        check_shape("beta", shape, beta.dim())?;
        check_shape("radial_velocity", shape, radial_velocity.dim())?;
        check_shape("mask", shape, mask.dim())?;
        check_elevations(elevation.as_slice().unwrap_or(&[]))?;
        if !(wavelength > 0.0) {
            return Err(Error::InvalidWavelength(wavelength));
        }
        if system_id.is_empty() {
            return Err(Error::EmptySystemId);
        }

        ndarray::Zip::from(&mut mask)
            .and(&beta)
            .for_each(|masked, value| *masked |= !value.is_finite());

        Ok(Self {
            time,
            radial_distance,
            elevation,
            beta,
            radial_velocity,
            mask,
            wavelength,
            system_id,
        })
    }

    /// Profile timestamps in microseconds since the Unix epoch, strictly increasing.
    pub fn time(&self) -> &[i64] {
        &self.time
    }

    /// Profile timestamps as UTC datetimes.
    pub fn times(&self) -> Vec<Option<DateTime<Utc>>> {
        self.time.iter().map(|&t| micros_to_datetime(t)).collect()
    }

    /// Distance from the instrument to the center of each range gate in meters, ascending.
    pub fn radial_distance(&self) -> &Array1<f64> {
        &self.radial_distance
    }

    /// Elevation angle of each profile in degrees.
    pub fn elevation(&self) -> &Array1<f64> {
        &self.elevation
    }

    /// Attenuated backscatter coefficient in m⁻¹ sr⁻¹, shape (time, range).
    pub fn beta(&self) -> &Array2<f64> {
        &self.beta
    }

    /// Radial Doppler velocity in m/s, shape (time, range).
    pub fn radial_velocity(&self) -> &Array2<f64> {
        &self.radial_velocity
    }

    /// Noise mask, shape (time, range); `true` marks cells that must not be used as signal.
    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    /// Laser wavelength in meters.
    pub fn wavelength(&self) -> f64 {
        self.wavelength
    }

    /// Identifier of the measuring instrument.
    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    /// Number of profiles.
    pub fn ntime(&self) -> usize {
        self.time.len()
    }

    /// Number of range gates.
    pub fn ngates(&self) -> usize {
        self.radial_distance.len()
    }
}

impl Debug for Stare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stare")
            .field("ntime", &self.ntime())
            .field("ngates", &self.ngates())
            .field("wavelength", &self.wavelength)
            .field("system_id", &self.system_id)
            .finish()
    }
}
