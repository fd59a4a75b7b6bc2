//!
//! Reader for Halo Photonics `.hpl` profile files.
//!
//! An `.hpl` file is a CRLF text file with a key-value header terminated by a `****` divider,
//! followed by profile groups of `1 + ngates` lines: a profile line carrying
//! `(decimal hours, azimuth, elevation [, pitch, roll])` and one line per range gate carrying
//! `(gate index, doppler, intensity, beta [, spectral width])`. Instruments truncate files
//! mid-profile and occasionally change the column count at the end of a file; the reader strips
//! such incomplete profiles instead of failing.
//!

mod header;
pub use header::{HaloHplHeader, MergeKey};

use crate::result::{Error, Result};
use crate::source::Source;
use crate::util::{argsort, grids_close, parse_f64, strictly_increasing_indices};
use ndarray::{Array1, Array2, Axis};
use std::collections::BTreeSet;

const MICROS_PER_DAY: i64 = 86_400_000_000;
const MICROS_PER_HOUR: f64 = 3_600_000_000.0;

/// One decoded `.hpl` file: a sequence of radial profiles sharing a header.
#[derive(Debug, Clone, PartialEq)]
pub struct HaloHpl {
    pub header: HaloHplHeader,
    /// Profile timestamps in microseconds since the Unix epoch, dim (time,).
    pub time: Vec<i64>,
    /// Distance to the gate centers in meters, dim (range,).
    pub radial_distance: Array1<f64>,
    /// Azimuth angle per profile in degrees, dim (time,).
    pub azimuth: Array1<f64>,
    /// Elevation angle per profile in degrees, dim (time,).
    pub elevation: Array1<f64>,
    pub pitch: Option<Array1<f64>>,
    pub roll: Option<Array1<f64>>,
    /// Radial Doppler velocity in m/s, dim (time, range).
    pub radial_velocity: Array2<f64>,
    /// Intensity (SNR + 1), dim (time, range).
    pub intensity: Array2<f64>,
    /// Attenuated backscatter in m⁻¹ sr⁻¹ as reported by the instrument, dim (time, range).
    pub beta: Array2<f64>,
    pub spectral_width: Option<Array2<f64>>,
}

impl HaloHpl {
    /// Decode a single `.hpl` byte source.
    pub fn from_source(source: &Source) -> Result<Self> {
        let filename = source.filename();
        let content = String::from_utf8_lossy(source.bytes()).replace('\0', "");
        let lines: Vec<&str> = content.lines().collect();

        let divider = lines
            .iter()
            .position(|line| line.trim_start().starts_with("****"))
            .ok_or_else(|| Error::MissingHeaderDivider {
                filename: filename.to_string(),
            })?;

        let header = header::parse_header(&lines[..=divider], filename)?;
        let data = trim_data_lines(&lines[divider + 1..], header.ngates);
        if data.is_empty() {
            return Err(Error::Empty {
                filename: filename.to_string(),
            });
        }

        parse_profiles(&header, &data, filename)
    }

    /// Number of profiles.
    pub fn ntime(&self) -> usize {
        self.time.len()
    }

    /// Number of range gates.
    pub fn ngates(&self) -> usize {
        self.radial_distance.len()
    }

    /// The distinct rounded azimuth angles, taken modulo 360 degrees.
    pub fn azimuth_angles(&self) -> BTreeSet<i64> {
        self.azimuth
            .iter()
            .map(|&a| (a.round() as i64).rem_euclid(360))
            .collect()
    }

    /// The distinct rounded elevation angles in degrees.
    pub fn elevation_angles(&self) -> BTreeSet<i64> {
        self.elevation.iter().map(|&e| e.round() as i64).collect()
    }

    /// Median time difference between consecutive profiles in microseconds.
    pub fn median_time_diff_micros(&self) -> Option<f64> {
        if self.time.len() < 2 {
            return None;
        }
        let mut diffs: Vec<i64> = self.time.windows(2).map(|w| w[1] - w[0]).collect();
        diffs.sort_unstable();
        let mid = diffs.len() / 2;
        Some(if diffs.len() % 2 == 0 {
            (diffs[mid - 1] + diffs[mid]) as f64 / 2.0
        } else {
            diffs[mid] as f64
        })
    }

    /// A new record containing the given profiles, in the given order.
    pub fn select(&self, rows: &[usize]) -> Self {
        Self {
            header: self.header.clone(),
            time: rows.iter().map(|&i| self.time[i]).collect(),
            radial_distance: self.radial_distance.clone(),
            azimuth: self.azimuth.select(Axis(0), rows),
            elevation: self.elevation.select(Axis(0), rows),
            pitch: self.pitch.as_ref().map(|a| a.select(Axis(0), rows)),
            roll: self.roll.as_ref().map(|a| a.select(Axis(0), rows)),
            radial_velocity: self.radial_velocity.select(Axis(0), rows),
            intensity: self.intensity.select(Axis(0), rows),
            beta: self.beta.select(Axis(0), rows),
            spectral_width: self.spectral_width.as_ref().map(|a| a.select(Axis(0), rows)),
        }
    }

    /// A copy sorted by time, ties keeping their original order.
    pub fn sorted_by_time(&self) -> Self {
        self.select(&argsort(&self.time))
    }

    /// A copy with every profile dropped whose time is not strictly greater than all earlier
    /// times.
    pub fn non_strictly_increasing_timesteps_removed(&self) -> Self {
        self.select(&strictly_increasing_indices(&self.time))
    }

    /// A copy with every profile dropped that contains a NaN in one of the core fields.
    pub fn nans_removed(&self) -> Self {
        let rows: Vec<usize> = (0..self.ntime())
            .filter(|&i| {
                self.azimuth[i].is_finite()
                    && self.elevation[i].is_finite()
                    && self.radial_velocity.row(i).iter().all(|v| v.is_finite())
                    && self.intensity.row(i).iter().all(|v| v.is_finite())
                    && self.beta.row(i).iter().all(|v| v.is_finite())
            })
            .collect();
        self.select(&rows)
    }

    /// Merge records sharing a header fingerprint by concatenating along time. The range grids
    /// must agree; optional fields must be present in either all or none of the records.
    pub fn merge(records: &[HaloHpl]) -> Result<HaloHpl> {
        let first = records.first().ok_or_else(|| Error::MergeMismatch {
            reason: "cannot merge an empty list of records".to_string(),
        })?;
        let key = first.header.merge_key();
        if records.iter().any(|r| r.header.merge_key() != key) {
            return Err(Error::MergeMismatch {
                reason: "header fingerprints differ between files".to_string(),
            });
        }
        if records
            .iter()
            .any(|r| !grids_close(&r.radial_distance, &first.radial_distance, 1e-6))
        {
            return Err(Error::MergeMismatch {
                reason: "range grids differ between files".to_string(),
            });
        }

        let headers: Vec<&HaloHplHeader> = records.iter().map(|r| &r.header).collect();
        Ok(HaloHpl {
            header: HaloHplHeader::merged(&headers)?,
            time: records.iter().flat_map(|r| r.time.iter().copied()).collect(),
            radial_distance: first.radial_distance.clone(),
            azimuth: concat_1d(records.iter().map(|r| &r.azimuth))?,
            elevation: concat_1d(records.iter().map(|r| &r.elevation))?,
            pitch: concat_optional_1d("pitch", records, |r| r.pitch.as_ref())?,
            roll: concat_optional_1d("roll", records, |r| r.roll.as_ref())?,
            radial_velocity: concat_2d(records.iter().map(|r| &r.radial_velocity))?,
            intensity: concat_2d(records.iter().map(|r| &r.intensity))?,
            beta: concat_2d(records.iter().map(|r| &r.beta))?,
            spectral_width: concat_optional_2d("spectral_width", records, |r| {
                r.spectral_width.as_ref()
            })?,
        })
    }
}

fn concat_1d<'a>(arrays: impl Iterator<Item = &'a Array1<f64>>) -> Result<Array1<f64>> {
    let views: Vec<_> = arrays.map(|a| a.view()).collect();
    ndarray::concatenate(Axis(0), &views).map_err(|err| Error::MergeMismatch {
        reason: err.to_string(),
    })
}

fn concat_2d<'a>(arrays: impl Iterator<Item = &'a Array2<f64>>) -> Result<Array2<f64>> {
    let views: Vec<_> = arrays.map(|a| a.view()).collect();
    ndarray::concatenate(Axis(0), &views).map_err(|err| Error::MergeMismatch {
        reason: err.to_string(),
    })
}

fn concat_optional_1d(
    field: &str,
    records: &[HaloHpl],
    get: impl Fn(&HaloHpl) -> Option<&Array1<f64>>,
) -> Result<Option<Array1<f64>>> {
    if records.iter().all(|r| get(r).is_none()) {
        return Ok(None);
    }
    let arrays: Vec<&Array1<f64>> = records
        .iter()
        .map(|r| {
            get(r).ok_or_else(|| Error::MergeMismatch {
                reason: format!("field {field} is present in only some of the files"),
            })
        })
        .collect::<Result<_>>()?;
    concat_1d(arrays.into_iter()).map(Some)
}

fn concat_optional_2d(
    field: &str,
    records: &[HaloHpl],
    get: impl Fn(&HaloHpl) -> Option<&Array2<f64>>,
) -> Result<Option<Array2<f64>>> {
    if records.iter().all(|r| get(r).is_none()) {
        return Ok(None);
    }
    let arrays: Vec<&Array2<f64>> = records
        .iter()
        .map(|r| {
            get(r).ok_or_else(|| Error::MergeMismatch {
                reason: format!("field {field} is present in only some of the files"),
            })
        })
        .collect::<Result<_>>()?;
    concat_2d(arrays.into_iter()).map(Some)
}

/// Strip incomplete profiles: leading lines up to the first profile whose first gate index is
/// `0`, trailing lines whose column count differs from the preceding line, and a trailing
/// partial group shorter than `ngates + 1` lines.
fn trim_data_lines<'a>(lines: &[&'a str], ngates: usize) -> Vec<&'a str> {
    let mut data: Vec<&str> = lines.to_vec();
    while data.first().map_or(false, |line| line.trim().is_empty()) {
        data.remove(0);
    }
    while data.last().map_or(false, |line| line.trim().is_empty()) {
        data.pop();
    }

    let mut start = 0;
    while start + 1 < data.len()
        && data[start + 1].split_whitespace().next() != Some("0")
    {
        start += 1;
    }
    data.drain(..start);

    let mut end = data.len();
    while end >= 2
        && ngates > 1
        && data[end - 1].split_whitespace().count() != data[end - 2].split_whitespace().count()
    {
        end -= 1;
    }
    data.truncate(end);

    let trailing = data.len() % (ngates + 1);
    data.truncate(data.len() - trailing);
    data
}

fn parse_profiles(header: &HaloHplHeader, lines: &[&str], filename: &str) -> Result<HaloHpl> {
    let ngates = header.ngates;
    let nprofiles = lines.len() / (ngates + 1);

    let mut profile_rows: Vec<Vec<f64>> = Vec::with_capacity(nprofiles);
    let mut gate_rows: Vec<Vec<f64>> = Vec::with_capacity(nprofiles * ngates);
    for (index, line) in lines.iter().enumerate() {
        let row = line
            .split_whitespace()
            .map(|token| parse_f64(token, "data value", filename))
            .collect::<Result<Vec<f64>>>()?;
        if index % (ngates + 1) == 0 {
            profile_rows.push(row);
        } else {
            gate_rows.push(row);
        }
    }

    let profile_width = profile_rows[0].len();
    if profile_width < 3 || profile_rows.iter().any(|row| row.len() != profile_width) {
        return Err(Error::InhomogeneousArray {
            filename: filename.to_string(),
        });
    }
    let gate_width = gate_rows[0].len();
    if gate_width < 4 || gate_rows.iter().any(|row| row.len() != gate_width) {
        return Err(Error::InhomogeneousArray {
            filename: filename.to_string(),
        });
    }

    for profile in gate_rows.chunks(ngates) {
        for (gate, row) in profile.iter().enumerate() {
            if (row[0] - gate as f64).abs() > 1e-9 {
                return Err(Error::IncoherentGates {
                    filename: filename.to_string(),
                    ngates,
                });
            }
        }
    }

    let start_of_day = header.start_time.div_euclid(MICROS_PER_DAY) * MICROS_PER_DAY;
    let time: Vec<i64> = profile_rows
        .iter()
        .map(|row| start_of_day + (row[0] * MICROS_PER_HOUR).round() as i64)
        .collect();
    let azimuth = Array1::from_iter(profile_rows.iter().map(|row| row[1]));
    let elevation = Array1::from_iter(profile_rows.iter().map(|row| row[2]));
    let pitch = (profile_width > 3).then(|| Array1::from_iter(profile_rows.iter().map(|r| r[3])));
    let roll = (profile_width > 4).then(|| Array1::from_iter(profile_rows.iter().map(|r| r[4])));

    let column = |index: usize| -> Array2<f64> {
        Array2::from_shape_fn((nprofiles, ngates), |(p, g)| gate_rows[p * ngates + g][index])
    };

    let radial_distance =
        Array1::from_iter((0..ngates).map(|g| (g as f64 + 0.5) * header.range_gate_length));

    Ok(HaloHpl {
        header: header.clone(),
        time,
        radial_distance,
        azimuth,
        elevation,
        pitch,
        roll,
        radial_velocity: column(1),
        intensity: column(2),
        beta: column(3),
        spectral_width: (gate_width > 4).then(|| column(4)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn minimal_file(profiles: &[(f64, f64, f64)]) -> String {
        let mut content = String::new();
        content.push_str("Filename:\tStare_213_20230101_06.hpl\r\n");
        content.push_str("System ID:\t213\r\n");
        content.push_str("Number of gates:\t3\r\n");
        content.push_str("Range gate length (m):\t30.0\r\n");
        content.push_str("Gate length (pts):\t10\r\n");
        content.push_str("Pulses/ray:\t10000\r\n");
        content.push_str("No. of rays in file:\t1\r\n");
        content.push_str("Scan type:\tStare\r\n");
        content.push_str("Focus range:\t65535\r\n");
        content.push_str("Start time:\t20230101 06:00:00.00\r\n");
        content.push_str("Resolution (m/s):\t0.0382\r\n");
        content.push_str(
            "Range of measurement (center of gate) = (range gate + 0.5) * Gate length\r\n",
        );
        content.push_str(
            "Data line 1: Decimal time (hours)  Azimuth (degrees)  Elevation (degrees)\r\n",
        );
        content.push_str("f9.6,1x,f6.2,1x,f6.2\r\n");
        content.push_str(
            "Data line 2: Range Gate  Doppler (m/s)  Intensity (SNR + 1)  Beta (m-1 sr-1)\r\n",
        );
        content.push_str("i3,1x,f6.4,1x,f8.6,1x,e12.6 - repeat for no. gates\r\n");
        content.push_str("****\r\n");
        for &(hours, azimuth, elevation) in profiles {
            content.push_str(&format!("{hours:.6} {azimuth:.2} {elevation:.2}\r\n"));
            for gate in 0..3 {
                content.push_str(&format!("{gate} 0.0382 1.01 1.0e-6\r\n"));
            }
        }
        content
    }

    fn source(content: &str) -> Source {
        Source::from_bytes("Stare_213_20230101_06.hpl", content.as_bytes())
    }

    #[test]
    fn test_minimal_stare_file() {
        let content = minimal_file(&[(6.0, 0.0, 90.0), (6.001, 0.0, 90.0)]);
        let raw = HaloHpl::from_source(&source(&content)).unwrap();

        assert_eq!(raw.ntime(), 2);
        assert_eq!(raw.ngates(), 3);
        assert_abs_diff_eq!(raw.radial_distance[0], 15.0);
        assert_abs_diff_eq!(raw.radial_distance[1], 45.0);
        assert_abs_diff_eq!(raw.radial_distance[2], 75.0);
        assert_eq!(raw.header.system_id, "213");
        // 2023-01-01 06:00 UTC
        assert_eq!(raw.time[0], 1_672_552_800_000_000);
        assert_abs_diff_eq!(raw.intensity[(0, 0)], 1.01);
        assert!(raw.pitch.is_none());
        assert!(raw.spectral_width.is_none());
    }

    #[test]
    fn test_trailing_partial_profile_is_dropped() {
        let mut content = minimal_file(&[(6.0, 0.0, 90.0)]);
        content.push_str("6.002000 0.00 90.00\r\n");
        content.push_str("0 0.0382 1.01 1.0e-6\r\n");
        let raw = HaloHpl::from_source(&source(&content)).unwrap();
        assert_eq!(raw.ntime(), 1);
    }

    #[test]
    fn test_leading_incomplete_profile_is_dropped() {
        let full = minimal_file(&[(6.0, 0.0, 90.0), (6.001, 0.0, 90.0)]);
        let (header, data) = full.split_once("****\r\n").unwrap();
        // Cut into the first profile so its first gate line is gone.
        let data = data.split_once("\r\n").unwrap().1.split_once("\r\n").unwrap().1;
        let content = format!("{header}****\r\n{data}");
        let raw = HaloHpl::from_source(&source(&content)).unwrap();
        assert_eq!(raw.ntime(), 1);
        assert_eq!(raw.time[0], 1_672_552_800_000_000 + 3_600_000);
    }

    #[test]
    fn test_incoherent_gates_is_an_error() {
        let content = minimal_file(&[(6.0, 0.0, 90.0)]).replace("\r\n2 0.0382", "\r\n7 0.0382");
        let result = HaloHpl::from_source(&source(&content));
        assert!(matches!(result, Err(Error::IncoherentGates { .. })));
    }

    #[test]
    fn test_missing_divider_is_an_error() {
        let result = HaloHpl::from_source(&source("Filename:\tx.hpl\r\n"));
        assert!(matches!(result, Err(Error::MissingHeaderDivider { .. })));
    }

    #[test]
    fn test_sort_and_dedup_are_idempotent() {
        let content = minimal_file(&[(6.002, 10.0, 90.0), (6.001, 20.0, 90.0), (6.001, 30.0, 90.0)]);
        let raw = HaloHpl::from_source(&source(&content)).unwrap();
        let sorted = raw.sorted_by_time().non_strictly_increasing_timesteps_removed();
        assert_eq!(sorted.ntime(), 2);
        assert!(sorted.time.windows(2).all(|w| w[1] > w[0]));
        let again = sorted.sorted_by_time();
        assert_eq!(again, sorted);
    }

    #[test]
    fn test_merge_requires_equal_fingerprints() {
        let a = HaloHpl::from_source(&source(&minimal_file(&[(6.0, 0.0, 90.0)]))).unwrap();
        let mut b = a.clone();
        b.header.pulses_per_ray = 20000;
        assert!(matches!(
            HaloHpl::merge(&[a.clone(), b]),
            Err(Error::MergeMismatch { .. })
        ));
        let merged = HaloHpl::merge(&[a.clone(), a]).unwrap();
        assert_eq!(merged.ntime(), 2);
    }
}
