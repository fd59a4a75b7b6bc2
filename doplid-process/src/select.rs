//!
//! Selection of the dominant homogeneous record set for each product. Raw files from one day
//! mix scan geometries and instrument configurations; a product is built from the largest
//! group that shares a header fingerprint and the right geometry.
//!

use crate::result::{Error, Result};
use doplid_decode::halo::HaloHpl;
use doplid_decode::windcube::WindCubeVad;
use itertools::Itertools;

const STARE_ELEVATION_FLUCTUATION: f64 = 2.0;
const STARE_VERTICAL_OFFSET: f64 = 15.0;
const WIND_TARGET_ELEVATION: f64 = 75.0;

/// Keep the records suitable for a stare product: a single pointing direction, near-vertical,
/// and within the fleet's dominant elevation. Of the surviving header-fingerprint groups the
/// one with the most profiles wins.
pub(crate) fn select_stare_records(raws: Vec<HaloHpl>) -> Result<Vec<HaloHpl>> {
    if raws.is_empty() {
        return Err(Error::NoData("no raw records to select stares from".to_string()));
    }

    let stares: Vec<HaloHpl> = raws
        .into_iter()
        .filter(|raw| raw.azimuth_angles().len() == 1 && raw.elevation_angles().len() == 1)
        .collect();
    if stares.is_empty() {
        return Err(Error::NoData(
            "no stare data: azimuth or elevation does not remain constant in any file".to_string(),
        ));
    }

    let max_elevation = stares
        .iter()
        .filter_map(|raw| raw.elevation_angles().first().copied())
        .fold(f64::NEG_INFINITY, |acc, angle| acc.max(angle as f64));

    let vertical: Vec<HaloHpl> = stares
        .into_iter()
        .filter(|raw| {
            let elevation = match raw.elevation_angles().first() {
                Some(&angle) => angle as f64,
                None => return false,
            };
            (elevation - max_elevation).abs() < STARE_ELEVATION_FLUCTUATION
                && (elevation - 90.0).abs() < STARE_VERTICAL_OFFSET
        })
        .collect();
    if vertical.is_empty() {
        return Err(Error::NoData("no data suitable for a stare product".to_string()));
    }

    Ok(dominant_group(vertical, |raw| raw.header.merge_key()))
}

/// Keep the records suitable for a wind product: one conical elevation between 25 and 80
/// degrees covering at least four distinct azimuths. Groups share a header fingerprint, an
/// elevation and an azimuth pattern; of the well-populated groups the one closest to 75
/// degrees elevation wins, larger groups breaking ties.
pub(crate) fn select_wind_records(raws: Vec<HaloHpl>) -> Result<Vec<HaloHpl>> {
    if raws.is_empty() {
        return Err(Error::NoData("no raw records to select scans from".to_string()));
    }

    let scans: Vec<HaloHpl> = raws
        .into_iter()
        .filter(|raw| {
            let elevations = raw.elevation_angles();
            if elevations.len() != 1 {
                return false;
            }
            let elevation = elevations.first().map_or(0, |&angle| angle) as f64;
            elevation > 25.0 && elevation < 80.0 && raw.azimuth_angles().len() >= 4
        })
        .collect();
    if scans.is_empty() {
        return Err(Error::NoData(
            "no data suitable for winds: need one elevation between 25 and 80 degrees \
             with at least 4 azimuths"
                .to_string(),
        ));
    }

    let key = |raw: &HaloHpl| {
        (
            raw.header.merge_key(),
            raw.elevation_angles().first().copied().unwrap_or(0),
            raw.azimuth_angles().iter().copied().collect::<Vec<i64>>(),
        )
    };

    let groups: Vec<(usize, i64, usize, Vec<HaloHpl>)> = scans
        .into_iter()
        .enumerate()
        .map(|(order, raw)| (key(&raw), order, raw))
        .into_group_map_by(|(key, _, _)| key.clone())
        .into_values()
        .map(|members| {
            let count = members.iter().map(|(_, _, raw)| raw.ntime()).sum();
            let elevation = members[0].0 .1;
            let first = members.iter().map(|(_, order, _)| *order).min().unwrap_or(0);
            let records = members.into_iter().map(|(_, _, raw)| raw).collect();
            (count, elevation, first, records)
        })
        .collect();

    let mean_count = groups.iter().map(|(count, ..)| *count).sum::<usize>() as f64
        / groups.len().max(1) as f64;
    // The largest group always exceeds half the mean, so this never empties the list.
    let candidates: Vec<&(usize, i64, usize, Vec<HaloHpl>)> = groups
        .iter()
        .filter(|(count, ..)| groups.len() == 1 || (*count as f64) > mean_count / 2.0)
        .collect();

    let best = candidates
        .into_iter()
        .min_by(|a, b| {
            let offset_a = (a.1 as f64 - WIND_TARGET_ELEVATION).abs();
            let offset_b = (b.1 as f64 - WIND_TARGET_ELEVATION).abs();
            offset_a
                .partial_cmp(&offset_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.0.cmp(&a.0))
                .then(a.2.cmp(&b.2))
        })
        .ok_or_else(|| Error::NoData("no wind group survived selection".to_string()))?;

    Ok(best.3.clone())
}

/// Keep the VAD profiles with a conical elevation and the most frequent rounded elevation.
pub(crate) fn select_vad_elevation(raw: &WindCubeVad) -> Result<WindCubeVad> {
    let rounded: Vec<i64> = raw.elevation.iter().map(|&angle| angle.round() as i64).collect();
    let mut counts = std::collections::BTreeMap::new();
    for (row, &elevation) in rounded.iter().enumerate() {
        if raw.elevation[row] > 15.0 && raw.elevation[row] < 85.0 {
            *counts.entry(elevation).or_insert(0usize) += 1;
        }
    }
    let (&dominant, _) = counts
        .iter()
        .max_by_key(|(&elevation, &count)| (count, -elevation))
        .ok_or_else(|| {
            Error::NoData("no sweeps with elevation between 15 and 85 degrees".to_string())
        })?;

    let rows: Vec<usize> = rounded
        .iter()
        .enumerate()
        .filter_map(|(row, &elevation)| {
            (elevation == dominant && raw.elevation[row] > 15.0 && raw.elevation[row] < 85.0)
                .then_some(row)
        })
        .collect();
    Ok(raw.select(&rows))
}

/// The group with the most profiles; ties go to the group appearing first in the input.
fn dominant_group<K: std::hash::Hash + Eq + Clone>(
    raws: Vec<HaloHpl>,
    key: impl Fn(&HaloHpl) -> K,
) -> Vec<HaloHpl> {
    let groups = raws
        .into_iter()
        .enumerate()
        .map(|(order, raw)| (key(&raw), order, raw))
        .into_group_map_by(|(key, _, _)| key.clone());

    groups
        .into_values()
        .map(|members| {
            let count: usize = members.iter().map(|(_, _, raw)| raw.ntime()).sum();
            let first = members.iter().map(|(_, order, _)| *order).min().unwrap_or(0);
            let records: Vec<HaloHpl> = members.into_iter().map(|(_, _, raw)| raw).collect();
            (count, first, records)
        })
        .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
        .map(|(_, _, records)| records)
        .unwrap_or_default()
}
