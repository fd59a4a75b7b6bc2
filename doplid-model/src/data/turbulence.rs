use crate::data::{check_shape, check_strictly_increasing, micros_to_datetime};
use crate::result::Result;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use std::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A turbulence product: the turbulent-kinetic-energy dissipation rate ε derived from the
/// vertical-velocity variance of a stare and an interpolated horizontal wind speed.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Turbulence {
    time: Vec<i64>,
    height: Array1<f64>,
    dissipation_rate: Array2<f64>,
    mask: Array2<bool>,
}

impl Turbulence {
    /// Create a new turbulence product, validating the grid invariants. The mask is widened so
    /// that every non-finite ε cell is masked.
    pub fn new(
        time: Vec<i64>,
        height: Array1<f64>,
        dissipation_rate: Array2<f64>,
        mut mask: Array2<bool>,
    ) -> Result<Self> {
        let shape = (time.len(), height.len());
        check_strictly_increasing(&time)?;
        check_shape("dissipation_rate", shape, dissipation_rate.dim())?;
        check_shape("mask", shape, mask.dim())?;

        ndarray::Zip::from(&mut mask)
            .and(&dissipation_rate)
            .for_each(|masked, value| *masked |= !value.is_finite());

        Ok(Self {
            time,
            height,
            dissipation_rate,
            mask,
        })
    }

    /// Timestamps in microseconds since the Unix epoch, strictly increasing.
    pub fn time(&self) -> &[i64] {
        &self.time
    }

    /// Timestamps as UTC datetimes.
    pub fn times(&self) -> Vec<Option<DateTime<Utc>>> {
        self.time.iter().map(|&t| micros_to_datetime(t)).collect()
    }

    /// Height of each level in meters, ascending.
    pub fn height(&self) -> &Array1<f64> {
        &self.height
    }

    /// Turbulent-kinetic-energy dissipation rate in m² s⁻³, shape (time, height).
    pub fn dissipation_rate(&self) -> &Array2<f64> {
        &self.dissipation_rate
    }

    /// Mask, shape (time, height); `true` marks cells where ε could not be derived reliably.
    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }
}

impl Debug for Turbulence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Turbulence")
            .field("ntime", &self.time.len())
            .field("nheights", &self.height.len())
            .finish()
    }
}
