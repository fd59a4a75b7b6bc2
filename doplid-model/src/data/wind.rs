use crate::data::{check_shape, check_strictly_increasing, micros_to_datetime};
use crate::result::{Error, Result};
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2};
use std::fmt::Debug;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A horizontal-wind product retrieved from conical (VAD/DBS) scans. One row is one completed
/// scan; the wind components are reported per height above the instrument.
#[derive(Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Wind {
    time: Vec<i64>,
    height: Array1<f64>,
    zonal_wind: Array2<f64>,
    meridional_wind: Array2<f64>,
    vertical_wind: Array2<f64>,
    mask: Array2<bool>,
    system_id: String,
}

impl Wind {
    /// Create a new wind product, validating the grid invariants. The mask is widened so that
    /// every cell with a non-finite wind component is masked.
    pub fn new(
        time: Vec<i64>,
        height: Array1<f64>,
        zonal_wind: Array2<f64>,
        meridional_wind: Array2<f64>,
        vertical_wind: Array2<f64>,
        mut mask: Array2<bool>,
        system_id: String,
    ) -> Result<Self> {
        let shape = (time.len(), height.len());
        check_strictly_increasing(&time)?;
        check_shape("zonal_wind", shape, zonal_wind.dim())?;
        check_shape("meridional_wind", shape, meridional_wind.dim())?;
        check_shape("vertical_wind", shape, vertical_wind.dim())?;
        check_shape("mask", shape, mask.dim())?;
        if system_id.is_empty() {
            return Err(Error::EmptySystemId);
        }

        ndarray::Zip::from(&mut mask)
            .and(&zonal_wind)
            .and(&meridional_wind)
            .and(&vertical_wind)
            .for_each(|masked, u, v, w| {
                *masked |= !u.is_finite() || !v.is_finite() || !w.is_finite()
            });

        Ok(Self {
            time,
            height,
            zonal_wind,
            meridional_wind,
            vertical_wind,
            mask,
            system_id,
        })
    }

    /// Scan timestamps in microseconds since the Unix epoch, strictly increasing. Each scan is
    /// stamped with its middle profile's time.
    pub fn time(&self) -> &[i64] {
        &self.time
    }

    /// Scan timestamps as UTC datetimes.
    pub fn times(&self) -> Vec<Option<DateTime<Utc>>> {
        self.time.iter().map(|&t| micros_to_datetime(t)).collect()
    }

    /// Height above the instrument of each retrieval level in meters, ascending.
    pub fn height(&self) -> &Array1<f64> {
        &self.height
    }

    /// Zonal (west-to-east) wind component in m/s, shape (time, height).
    pub fn zonal_wind(&self) -> &Array2<f64> {
        &self.zonal_wind
    }

    /// Meridional (south-to-north) wind component in m/s, shape (time, height).
    pub fn meridional_wind(&self) -> &Array2<f64> {
        &self.meridional_wind
    }

    /// Vertical wind component in m/s, shape (time, height).
    pub fn vertical_wind(&self) -> &Array2<f64> {
        &self.vertical_wind
    }

    /// Retrieval-quality mask, shape (time, height); `true` marks unreliable cells.
    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    /// Identifier of the measuring instrument.
    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    /// Horizontal wind speed `sqrt(u² + v²)` in m/s, shape (time, height).
    pub fn horizontal_wind_speed(&self) -> Array2<f64> {
        let mut speed = Array2::zeros(self.zonal_wind.dim());
        ndarray::Zip::from(&mut speed)
            .and(&self.zonal_wind)
            .and(&self.meridional_wind)
            .for_each(|s, u, v| *s = u.hypot(*v));
        speed
    }

    /// Meteorological direction the horizontal wind blows towards, in degrees within
    /// [0°, 360°), shape (time, height).
    pub fn horizontal_wind_direction(&self) -> Array2<f64> {
        let mut direction = Array2::zeros(self.zonal_wind.dim());
        ndarray::Zip::from(&mut direction)
            .and(&self.zonal_wind)
            .and(&self.meridional_wind)
            .for_each(|d, u, v| {
                let mut angle = u.atan2(*v).to_degrees();
                if angle < 0.0 {
                    angle += 360.0;
                }
                *d = angle;
            });
        direction
    }

    /// Number of scans.
    pub fn ntime(&self) -> usize {
        self.time.len()
    }

    /// Number of retrieval levels.
    pub fn nheights(&self) -> usize {
        self.height.len()
    }
}

impl Debug for Wind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wind")
            .field("ntime", &self.ntime())
            .field("nheights", &self.nheights())
            .field("system_id", &self.system_id)
            .finish()
    }
}
