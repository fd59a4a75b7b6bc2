//!
//! This module contains the science products built from raw Doppler lidar measurements. Each
//! product owns its arrays: the time axis in microseconds since the Unix epoch, the range or
//! height grid in meters, the measured 2-D fields in row-major (time, gate) layout, and a
//! boolean mask of the same shape where `true` marks a cell that must not be consumed as signal.
//!
//! Construction validates the structural invariants (strictly increasing time, matching shapes,
//! NaN cells masked) and products are never mutated afterwards.
//!

mod stare;
pub use stare::*;

mod stare_depol;
pub use stare_depol::*;

mod wind;
pub use wind::*;

mod turbulence;
pub use turbulence::*;

use crate::result::{Error, Result};
use chrono::{DateTime, Utc};

/// Convert a microseconds-since-epoch timestamp to a UTC datetime; None if out of range.
pub fn micros_to_datetime(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros)
}

fn check_strictly_increasing(time: &[i64]) -> Result<()> {
    for (index, pair) in time.windows(2).enumerate() {
        if pair[1] <= pair[0] {
            return Err(Error::NonMonotonicTime { index: index + 1 });
        }
    }
    Ok(())
}

fn check_len(field: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::LengthMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_shape(field: &'static str, expected: (usize, usize), actual: (usize, usize)) -> Result<()> {
    if expected != actual {
        return Err(Error::ShapeMismatch {
            field,
            expected,
            actual,
        });
    }
    Ok(())
}

fn check_elevations(elevation: &[f64]) -> Result<()> {
    for &angle in elevation {
        if !(-90.0..=90.0).contains(&angle) {
            return Err(Error::InvalidElevation(angle));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Error;
    use ndarray::{array, Array1, Array2};

    fn stare(beta: Array2<f64>, mask: Array2<bool>) -> Result<Stare> {
        let ntime = beta.nrows();
        Stare::new(
            (0..ntime as i64).map(|i| i * 1_000_000).collect(),
            array![15.0, 45.0],
            Array1::from_elem(ntime, 90.0),
            beta,
            Array2::zeros((ntime, 2)),
            mask,
            1.565e-6,
            "213".to_string(),
        )
    }

    #[test]
    fn test_nan_beta_cells_are_masked() {
        let beta = array![[1.0, f64::NAN], [2.0, 3.0]];
        let mask = Array2::from_elem((2, 2), false);
        let product = stare(beta, mask).unwrap();
        assert!(product.mask()[(0, 1)]);
        assert!(!product.mask()[(1, 1)]);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let beta = Array2::zeros((2, 3));
        let mask = Array2::from_elem((2, 3), false);
        let result = stare(beta, mask);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_non_monotonic_time_is_rejected() {
        let result = Stare::new(
            vec![0, 0],
            array![15.0],
            array![90.0, 90.0],
            Array2::zeros((2, 1)),
            Array2::zeros((2, 1)),
            Array2::from_elem((2, 1), false),
            1.565e-6,
            "213".to_string(),
        );
        assert!(matches!(result, Err(Error::NonMonotonicTime { index: 1 })));
    }

    #[test]
    fn test_wind_direction_is_wrapped_to_a_full_circle() {
        let wind = Wind::new(
            vec![0, 1_000_000],
            array![100.0],
            array![[3.0], [-3.0]],
            array![[-1.0], [0.0]],
            array![[0.1], [0.2]],
            Array2::from_elem((2, 1), false),
            "213".to_string(),
        )
        .unwrap();
        let speed = wind.horizontal_wind_speed();
        let direction = wind.horizontal_wind_direction();
        assert!((speed[(0, 0)] - 10.0_f64.sqrt()).abs() < 1e-12);
        for value in direction.iter() {
            assert!((0.0..360.0).contains(value));
        }
        // Due west wind points to 270 degrees.
        assert!((direction[(1, 0)] - 270.0).abs() < 1e-12);
    }
}
