//!
//! The depolarisation product: align a cross-polarised stare onto a co-polarised one in time
//! and form the depolarisation ratio, subtracting the polariser bleed-through.
//!

use crate::result::{Error, Result};
use doplid_model::data::{Stare, StareDepol};
use ndarray::Array2;

/// A cross profile only matches a co profile when it follows within twice the co product's
/// median profile spacing.
const MATCH_SPACING_FACTOR: f64 = 2.0;
const ELEVATION_TOLERANCE: f64 = 1.0;
const RANGE_TOLERANCE: f64 = 1.0;

/// Build a depolarisation product from a co-polarised and a cross-polarised stare.
///
/// For every co profile the first cross profile at or after it is matched when it falls
/// within the acceptance window; rows without a match are NaN and masked. Masked cells are
/// written as NaN, so the depolarisation mask is exactly its NaN pattern.
pub fn stare_depol(co: Stare, cross: &Stare, polariser_bleed_through: f64) -> Result<StareDepol> {
    let relative_tolerance = co.wavelength() * 1e-9;
    if (co.wavelength() - cross.wavelength()).abs() > relative_tolerance {
        return Err(Error::InvalidArgument(format!(
            "different wavelength in co and cross: {} vs {}",
            co.wavelength(),
            cross.wavelength()
        )));
    }
    if co.system_id() != cross.system_id() {
        return Err(Error::InvalidArgument(format!(
            "different system id in co and cross: {} vs {}",
            co.system_id(),
            cross.system_id()
        )));
    }
    if co.ngates() != cross.ngates() {
        return Err(Error::Shape(format!(
            "co has {} range gates but cross has {}",
            co.ngates(),
            cross.ngates()
        )));
    }
    if co
        .radial_distance()
        .iter()
        .zip(cross.radial_distance().iter())
        .any(|(a, b)| (a - b).abs() > RANGE_TOLERANCE)
    {
        return Err(Error::Shape(
            "co and cross disagree on the range grid".to_string(),
        ));
    }

    let threshold = MATCH_SPACING_FACTOR
        * median_time_diff(co.time()).ok_or_else(|| {
            Error::NoData("co stare has too few profiles to align against".to_string())
        })?;

    let matches: Vec<Option<usize>> = co
        .time()
        .iter()
        .map(|&t| {
            let index = cross.time().partition_point(|&cross_time| cross_time < t);
            let matched = index < cross.time().len()
                && ((cross.time()[index] - t) as f64) < threshold;
            matched.then_some(index)
        })
        .collect();

    for (row, candidate) in matches.iter().enumerate() {
        if let Some(cross_row) = candidate {
            let difference = (co.elevation()[row] - cross.elevation()[*cross_row]).abs();
            if difference > ELEVATION_TOLERANCE {
                return Err(Error::InvalidArgument(format!(
                    "co and cross elevations differ by {difference:.2} degrees on matched \
                     profiles"
                )));
            }
        }
    }

    let shape = (co.ntime(), co.ngates());
    let mut beta_cross = Array2::from_elem(shape, f64::NAN);
    let mut depolarisation = Array2::from_elem(shape, f64::NAN);
    let mut mask_beta_cross = Array2::from_elem(shape, true);
    let mut mask_depolarisation = Array2::from_elem(shape, true);

    for (row, candidate) in matches.iter().enumerate() {
        let Some(cross_row) = candidate else {
            continue;
        };
        for gate in 0..shape.1 {
            let cross_value = cross.beta()[(*cross_row, gate)];
            let co_value = co.beta()[(row, gate)];
            beta_cross[(row, gate)] = cross_value;

            let cross_masked = cross.mask()[(*cross_row, gate)];
            mask_beta_cross[(row, gate)] = cross_masked;

            let masked = cross_masked || co.mask()[(row, gate)];
            let ratio = (cross_value - polariser_bleed_through * co_value) / co_value;
            if !masked && ratio.is_finite() {
                depolarisation[(row, gate)] = ratio;
                mask_depolarisation[(row, gate)] = false;
            }
        }
    }

    Ok(StareDepol::new(
        co,
        beta_cross,
        depolarisation,
        mask_beta_cross,
        mask_depolarisation,
        polariser_bleed_through,
    )?)
}

fn median_time_diff(time: &[i64]) -> Option<f64> {
    if time.len() < 2 {
        return None;
    }
    let mut diffs: Vec<i64> = time.windows(2).map(|pair| pair[1] - pair[0]).collect();
    diffs.sort_unstable();
    let mid = diffs.len() / 2;
    Some(if diffs.len() % 2 == 0 {
        (diffs[mid - 1] + diffs[mid]) as f64 / 2.0
    } else {
        diffs[mid] as f64
    })
}
