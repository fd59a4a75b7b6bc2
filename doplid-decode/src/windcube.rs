//!
//! Readers for WindCube NetCDF sweep files.
//!
//! A WindCube file is a self-describing NetCDF container with one or more sweep groups. Fixed
//! stares carry per-gate CNR, relative backscatter and radial wind speed on a (time, range)
//! grid; VAD/DBS files additionally carry the measurement height and a scan index per profile.
//! Sweep groups are discovered from the file's group listing (names starting with `Sweep`).
//!
//! Cells equal to a variable's fill value are tolerated and only logged; structural problems
//! (missing variables, wrong dimensions or units) are errors.
//!

use crate::result::{Error, Result};
use crate::source::Source;
use crate::util::{argsort, grids_close, merge_all_equal, strictly_increasing_indices};
use chrono::NaiveDateTime;
use log::warn;
use ndarray::{Array1, Array2, Axis};

/// A fixed (staring) WindCube record.
#[derive(Debug, Clone, PartialEq)]
pub struct WindCubeFixed {
    /// Profile timestamps in microseconds since the Unix epoch, dim (time,).
    pub time: Vec<i64>,
    /// Distance to the gate centers in meters, dim (range,).
    pub radial_distance: Array1<f64>,
    /// Azimuth angle per profile in degrees, dim (time,).
    pub azimuth: Array1<f64>,
    /// Elevation angle per profile in degrees, dim (time,).
    pub elevation: Array1<f64>,
    /// Carrier-to-noise ratio in dB, dim (time, range).
    pub cnr: Array2<f64>,
    /// Relative backscatter in m⁻¹ sr⁻¹, dim (time, range).
    pub relative_beta: Array2<f64>,
    /// Radial wind speed in m/s, dim (time, range).
    pub radial_velocity: Array2<f64>,
    /// Radial wind speed confidence index in percent, dim (time, range).
    pub radial_velocity_confidence: Array2<f64>,
    /// Doppler spectrum width in m/s, dim (time, range).
    pub doppler_spectrum_width: Array2<f64>,
    /// Ray accumulation time in seconds.
    pub ray_accumulation_time: f64,
    pub system_id: String,
}

/// A conical-scan (VAD/DBS) WindCube record.
#[derive(Debug, Clone, PartialEq)]
pub struct WindCubeVad {
    /// Profile timestamps in microseconds since the Unix epoch, dim (time,).
    pub time: Vec<i64>,
    /// Distance to the gate centers in meters, dim (range,).
    pub radial_distance: Array1<f64>,
    /// Height of the gate centers above the instrument in meters, dim (range,).
    pub height: Array1<f64>,
    /// Azimuth angle per profile in degrees, dim (time,).
    pub azimuth: Array1<f64>,
    /// Elevation angle per profile in degrees, dim (time,).
    pub elevation: Array1<f64>,
    /// Carrier-to-noise ratio in dB, dim (time, range).
    pub cnr: Array2<f64>,
    /// Radial wind speed in m/s, dim (time, range).
    pub radial_velocity: Array2<f64>,
    /// Radial wind speed confidence index in percent, dim (time, range).
    pub radial_velocity_confidence: Array2<f64>,
    /// Index of the sweep each profile belongs to, dim (time,).
    pub scan_index: Vec<i64>,
    pub system_id: String,
}

impl WindCubeFixed {
    /// Decode a fixed-stare NetCDF byte source, concatenating its sweep groups along time.
    pub fn from_source(source: &Source) -> Result<Self> {
        let filename = source.filename();
        let file = netcdf::open_mem(None, source.bytes()).map_err(|source| Error::NetCdf {
            filename: filename.to_string(),
            source,
        })?;
        let system_id = read_system_id(&file, filename)?;

        let mut parts: Vec<WindCubeFixed> = Vec::new();
        for name in sweep_group_names(&file, filename)? {
            let group = open_group(&file, &name, filename)?;
            parts.push(read_fixed_group(&group, &system_id, filename)?);
        }
        if parts.is_empty() {
            return Err(Error::Empty {
                filename: filename.to_string(),
            });
        }
        Self::merge(&parts)
    }

    /// Number of profiles.
    pub fn ntime(&self) -> usize {
        self.time.len()
    }

    /// Number of range gates.
    pub fn ngates(&self) -> usize {
        self.radial_distance.len()
    }

    /// A new record containing the given profiles, in the given order.
    pub fn select(&self, rows: &[usize]) -> Self {
        Self {
            time: rows.iter().map(|&i| self.time[i]).collect(),
            radial_distance: self.radial_distance.clone(),
            azimuth: self.azimuth.select(Axis(0), rows),
            elevation: self.elevation.select(Axis(0), rows),
            cnr: self.cnr.select(Axis(0), rows),
            relative_beta: self.relative_beta.select(Axis(0), rows),
            radial_velocity: self.radial_velocity.select(Axis(0), rows),
            radial_velocity_confidence: self.radial_velocity_confidence.select(Axis(0), rows),
            doppler_spectrum_width: self.doppler_spectrum_width.select(Axis(0), rows),
            ray_accumulation_time: self.ray_accumulation_time,
            system_id: self.system_id.clone(),
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
                    && self.cnr.row(i).iter().all(|v| v.is_finite())
                    && self.radial_velocity.row(i).iter().all(|v| v.is_finite())
            })
            .collect();
        self.select(&rows)
    }

    /// Merge records by concatenating along time. The range grids, accumulation times and
    /// system ids must agree.
    pub fn merge(records: &[WindCubeFixed]) -> Result<WindCubeFixed> {
        let first = records.first().ok_or_else(|| Error::MergeMismatch {
            reason: "cannot merge an empty list of records".to_string(),
        })?;
        if records
            .iter()
            .any(|r| !grids_close(&r.radial_distance, &first.radial_distance, 1e-6))
        {
            return Err(Error::MergeMismatch {
                reason: "range grids differ between sweeps".to_string(),
            });
        }
        Ok(WindCubeFixed {
            time: records.iter().flat_map(|r| r.time.iter().copied()).collect(),
            radial_distance: first.radial_distance.clone(),
            azimuth: concat_1d(records.iter().map(|r| &r.azimuth))?,
            elevation: concat_1d(records.iter().map(|r| &r.elevation))?,
            cnr: concat_2d(records.iter().map(|r| &r.cnr))?,
            relative_beta: concat_2d(records.iter().map(|r| &r.relative_beta))?,
            radial_velocity: concat_2d(records.iter().map(|r| &r.radial_velocity))?,
            radial_velocity_confidence: concat_2d(
                records.iter().map(|r| &r.radial_velocity_confidence),
            )?,
            doppler_spectrum_width: concat_2d(records.iter().map(|r| &r.doppler_spectrum_width))?,
            ray_accumulation_time: merge_all_equal(
                "ray_accumulation_time",
                &records
                    .iter()
                    .map(|r| r.ray_accumulation_time)
                    .collect::<Vec<_>>(),
            )?,
            system_id: merge_all_equal(
                "system_id",
                &records.iter().map(|r| r.system_id.clone()).collect::<Vec<_>>(),
            )?,
        })
    }
}

impl WindCubeVad {
    /// Decode a VAD/DBS NetCDF byte source, concatenating its sweep groups along time and
    /// numbering each group as one scan.
    pub fn from_source(source: &Source) -> Result<Self> {
        let filename = source.filename();
        let file = netcdf::open_mem(None, source.bytes()).map_err(|source| Error::NetCdf {
            filename: filename.to_string(),
            source,
        })?;
        let system_id = read_system_id(&file, filename)?;

        let mut parts: Vec<WindCubeVad> = Vec::new();
        for (index, name) in sweep_group_names(&file, filename)?.into_iter().enumerate() {
            let group = open_group(&file, &name, filename)?;
            parts.push(read_vad_group(&group, index as i64, &system_id, filename)?);
        }
        if parts.is_empty() {
            return Err(Error::Empty {
                filename: filename.to_string(),
            });
        }
        Self::merge(&parts)
    }

    /// Number of profiles.
    pub fn ntime(&self) -> usize {
        self.time.len()
    }

    /// A new record containing the given profiles, in the given order.
    pub fn select(&self, rows: &[usize]) -> Self {
        Self {
            time: rows.iter().map(|&i| self.time[i]).collect(),
            radial_distance: self.radial_distance.clone(),
            height: self.height.clone(),
            azimuth: self.azimuth.select(Axis(0), rows),
            elevation: self.elevation.select(Axis(0), rows),
            cnr: self.cnr.select(Axis(0), rows),
            radial_velocity: self.radial_velocity.select(Axis(0), rows),
            radial_velocity_confidence: self.radial_velocity_confidence.select(Axis(0), rows),
            scan_index: rows.iter().map(|&i| self.scan_index[i]).collect(),
            system_id: self.system_id.clone(),
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
            .filter(|&row| {
                self.azimuth[row].is_finite()
                    && self.elevation[row].is_finite()
                    && self.cnr.row(row).iter().all(|value| value.is_finite())
                    && self
                        .radial_velocity
                        .row(row)
                        .iter()
                        .all(|value| value.is_finite())
            })
            .collect();
        self.select(&rows)
    }

    /// A copy with the scan indices renumbered to consecutive integers in order of first
    /// appearance.
    pub fn reindexed_scan_indices(&self) -> Self {
        let mut mapping = std::collections::HashMap::new();
        let mut next = 0;
        let scan_index = self
            .scan_index
            .iter()
            .map(|&index| {
                *mapping.entry(index).or_insert_with(|| {
                    let value = next;
                    next += 1;
                    value
                })
            })
            .collect();
        Self {
            scan_index,
            ..self.clone()
        }
    }

    /// Merge records by concatenating along time. Scan indices are shifted so that scans from
    /// different files stay distinct.
    pub fn merge(records: &[WindCubeVad]) -> Result<WindCubeVad> {
        let first = records.first().ok_or_else(|| Error::MergeMismatch {
            reason: "cannot merge an empty list of records".to_string(),
        })?;
        if records
            .iter()
            .any(|r| !grids_close(&r.radial_distance, &first.radial_distance, 1e-6))
        {
            return Err(Error::MergeMismatch {
                reason: "range grids differ between sweeps".to_string(),
            });
        }

        let mut scan_index = Vec::new();
        let mut offset = 0;
        for record in records {
            let max = record.scan_index.iter().copied().max().unwrap_or(-1);
            scan_index.extend(record.scan_index.iter().map(|&index| index + offset));
            offset += max + 1;
        }

        Ok(WindCubeVad {
            time: records.iter().flat_map(|r| r.time.iter().copied()).collect(),
            radial_distance: first.radial_distance.clone(),
            height: first.height.clone(),
            azimuth: concat_1d(records.iter().map(|r| &r.azimuth))?,
            elevation: concat_1d(records.iter().map(|r| &r.elevation))?,
            cnr: concat_2d(records.iter().map(|r| &r.cnr))?,
            radial_velocity: concat_2d(records.iter().map(|r| &r.radial_velocity))?,
            radial_velocity_confidence: concat_2d(
                records.iter().map(|r| &r.radial_velocity_confidence),
            )?,
            scan_index,
            system_id: merge_all_equal(
                "system_id",
                &records.iter().map(|r| r.system_id.clone()).collect::<Vec<_>>(),
            )?,
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

fn read_system_id(file: &netcdf::File, filename: &str) -> Result<String> {
    for name in ["lidar_id", "instrument_name"] {
        if let Some(attribute) = file.attribute(name) {
            if let Ok(netcdf::AttrValue::Str(value)) = attribute.value() {
                if !value.is_empty() {
                    return Ok(value);
                }
            }
        }
    }
    Err(Error::MissingAttribute {
        name: "lidar_id".to_string(),
        filename: filename.to_string(),
    })
}

/// Sweep groups in sweep order: names like `Sweep_10` carry their position in a trailing
/// number, which a lexicographic sort would put before `Sweep_2`.
fn sweep_group_names(file: &netcdf::File, filename: &str) -> Result<Vec<String>> {
    let mut names: Vec<String> = file
        .groups()
        .map_err(|source| Error::NetCdf {
            filename: filename.to_string(),
            source,
        })?
        .map(|group| group.name())
        .filter(|name| name.to_ascii_lowercase().starts_with("sweep"))
        .collect();
    sort_by_sweep_number(&mut names);
    Ok(names)
}

fn sort_by_sweep_number(names: &mut [String]) {
    names.sort_by_key(|name| (trailing_number(name), name.clone()));
}

fn trailing_number(name: &str) -> Option<i64> {
    let trimmed = name.trim_end_matches(|c: char| !c.is_ascii_digit());
    let count = trimmed.bytes().rev().take_while(u8::is_ascii_digit).count();
    if count == 0 {
        return None;
    }
    trimmed[trimmed.len() - count..].parse().ok()
}

fn open_group<'f>(
    file: &'f netcdf::File,
    name: &str,
    filename: &str,
) -> Result<netcdf::Group<'f>> {
    file.group(name)
        .map_err(|source| Error::NetCdf {
            filename: filename.to_string(),
            source,
        })?
        .ok_or_else(|| Error::MissingVariable {
            name: name.to_string(),
            filename: filename.to_string(),
        })
}

fn variable<'g>(
    group: &'g netcdf::Group,
    name: &str,
    filename: &str,
) -> Result<netcdf::Variable<'g>> {
    group.variable(name).ok_or_else(|| Error::MissingVariable {
        name: name.to_string(),
        filename: filename.to_string(),
    })
}

fn string_attribute(var: &netcdf::Variable, name: &str) -> Option<String> {
    var.attribute(name).and_then(|attribute| match attribute.value() {
        Ok(netcdf::AttrValue::Str(value)) => Some(value),
        _ => None,
    })
}

fn numeric_attribute(var: &netcdf::Variable, name: &str) -> Option<f64> {
    var.attribute(name).and_then(|attribute| match attribute.value() {
        Ok(netcdf::AttrValue::Double(value)) => Some(value),
        Ok(netcdf::AttrValue::Float(value)) => Some(value as f64),
        Ok(netcdf::AttrValue::Int(value)) => Some(value as f64),
        _ => None,
    })
}

fn check_units(
    var: &netcdf::Variable,
    accepted: &[&str],
    name: &str,
    filename: &str,
) -> Result<()> {
    let units = string_attribute(var, "units").unwrap_or_default();
    if !accepted.contains(&units.as_str()) {
        return Err(Error::UnexpectedUnits {
            units,
            name: name.to_string(),
            filename: filename.to_string(),
        });
    }
    Ok(())
}

/// Read a variable's values, logging fill-value cells instead of failing on them.
fn read_values(var: &netcdf::Variable, name: &str, filename: &str) -> Result<Vec<f64>> {
    let values: Vec<f64> = var
        .get_values(..)
        .map_err(|source| Error::NetCdf {
            filename: filename.to_string(),
            source,
        })?;
    if let Some(fill) = numeric_attribute(var, "_FillValue") {
        let masked = values.iter().filter(|&&v| v == fill).count();
        if masked > 0 {
            warn!("{filename}: variable '{name}' has {masked} masked cells");
        }
    }
    Ok(values)
}

fn read_1d(group: &netcdf::Group, name: &str, filename: &str) -> Result<Array1<f64>> {
    let var = variable(group, name, filename)?;
    if var.dimensions().len() != 1 {
        return Err(Error::UnexpectedDimensions {
            name: name.to_string(),
            filename: filename.to_string(),
        });
    }
    Ok(Array1::from_vec(read_values(&var, name, filename)?))
}

fn read_2d(group: &netcdf::Group, name: &str, filename: &str) -> Result<Array2<f64>> {
    let var = variable(group, name, filename)?;
    let dims = var.dimensions();
    if dims.len() != 2 {
        return Err(Error::UnexpectedDimensions {
            name: name.to_string(),
            filename: filename.to_string(),
        });
    }
    let shape = (dims[0].len(), dims[1].len());
    let values = read_values(&var, name, filename)?;
    Array2::from_shape_vec(shape, values).map_err(|_| Error::UnexpectedDimensions {
        name: name.to_string(),
        filename: filename.to_string(),
    })
}

/// Read a (time, gate) variable whose rows must all be equal, collapsing it to one row.
fn read_constant_rows(group: &netcdf::Group, name: &str, filename: &str) -> Result<Array1<f64>> {
    let values = read_2d(group, name, filename)?;
    let first = values.row(0).to_owned();
    for row in values.rows() {
        if row.iter().zip(first.iter()).any(|(a, b)| (a - b).abs() > 1e-6) {
            return Err(Error::UnexpectedDimensions {
                name: name.to_string(),
                filename: filename.to_string(),
            });
        }
    }
    Ok(first)
}

fn read_time(group: &netcdf::Group, file_time_reference: Option<&str>, filename: &str) -> Result<Vec<i64>> {
    let var = variable(group, "time", filename)?;
    if var.dimensions().len() != 1 {
        return Err(Error::UnexpectedDimensions {
            name: "time".to_string(),
            filename: filename.to_string(),
        });
    }
    let units = string_attribute(&var, "units").ok_or_else(|| Error::MissingAttribute {
        name: "units".to_string(),
        filename: filename.to_string(),
    })?;
    let reference = string_attribute(&var, "time_reference").or_else(|| file_time_reference.map(str::to_string));
    let values = read_values(&var, "time", filename)?;
    decode_cf_time(&values, &units, reference.as_deref(), filename)
}

/// Decode CF time values given a `"<unit> since <reference>"` units string. A separate
/// `time_reference` attribute, when present, substitutes the reference part.
fn decode_cf_time(
    values: &[f64],
    units: &str,
    reference_override: Option<&str>,
    filename: &str,
) -> Result<Vec<i64>> {
    let (unit, reference) = units.split_once(" since ").ok_or_else(|| Error::InvalidTimestamp {
        value: units.to_string(),
        filename: filename.to_string(),
    })?;
    let micros_per_unit = match unit.trim() {
        "microseconds" => 1.0,
        "milliseconds" => 1e3,
        "seconds" | "second" | "s" => 1e6,
        "minutes" => 60.0 * 1e6,
        "hours" => 3_600.0 * 1e6,
        "days" => 86_400.0 * 1e6,
        _ => {
            return Err(Error::InvalidTimestamp {
                value: units.to_string(),
                filename: filename.to_string(),
            })
        }
    };
    let reference = reference_override.unwrap_or(reference);
    let reference_micros = parse_cf_reference(reference).ok_or_else(|| Error::InvalidTimestamp {
        value: reference.to_string(),
        filename: filename.to_string(),
    })?;
    Ok(values
        .iter()
        .map(|&value| reference_micros + (value * micros_per_unit).round() as i64)
        .collect())
}

fn parse_cf_reference(reference: &str) -> Option<i64> {
    let cleaned = reference
        .trim()
        .trim_end_matches("UTC")
        .trim_end_matches('Z')
        .trim();
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(cleaned, format) {
            return Some(parsed.and_utc().timestamp_micros());
        }
        if format == "%Y-%m-%d" {
            if let Ok(date) = chrono::NaiveDate::parse_from_str(cleaned, format) {
                return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_micros());
            }
        }
    }
    None
}

fn file_time_reference(group: &netcdf::Group) -> Option<String> {
    group.attribute("time_reference").and_then(|attribute| match attribute.value() {
        Ok(netcdf::AttrValue::Str(value)) => Some(value),
        _ => None,
    })
}

fn read_fixed_group(
    group: &netcdf::Group,
    system_id: &str,
    filename: &str,
) -> Result<WindCubeFixed> {
    let reference = file_time_reference(group);
    let time = read_time(group, reference.as_deref(), filename)?;
    let ntime = time.len();

    check_units(&variable(group, "cnr", filename)?, &["dB"], "cnr", filename)?;
    check_units(
        &variable(group, "radial_wind_speed", filename)?,
        &["m s-1"],
        "radial_wind_speed",
        filename,
    )?;
    check_units(
        &variable(group, "radial_wind_speed_ci", filename)?,
        &["percent", "%"],
        "radial_wind_speed_ci",
        filename,
    )?;
    check_units(
        &variable(group, "doppler_spectrum_width", filename)?,
        &["m s-1"],
        "doppler_spectrum_width",
        filename,
    )?;
    check_units(
        &variable(group, "relative_beta", filename)?,
        &["m-1 sr-1", "m-1.sr-1"],
        "relative_beta",
        filename,
    )?;

    let radial_distance = {
        let var = variable(group, "range", filename)?;
        check_units(&var, &["m"], "range", filename)?;
        match var.dimensions().len() {
            1 => read_1d(group, "range", filename)?,
            2 => read_constant_rows(group, "range", filename)?,
            _ => {
                return Err(Error::UnexpectedDimensions {
                    name: "range".to_string(),
                    filename: filename.to_string(),
                })
            }
        }
    };

    let per_time_angle = |name: &str| -> Result<Array1<f64>> {
        let values = read_1d(group, name, filename)?;
        if values.len() == ntime {
            Ok(values)
        } else if values.len() == 1 {
            Ok(Array1::from_elem(ntime, values[0]))
        } else {
            Err(Error::UnexpectedDimensions {
                name: name.to_string(),
                filename: filename.to_string(),
            })
        }
    };

    let accumulation = {
        let var = variable(group, "ray_accumulation_time", filename)?;
        check_units(&var, &["ms"], "ray_accumulation_time", filename)?;
        let values = read_values(&var, "ray_accumulation_time", filename)?;
        values.first().copied().ok_or_else(|| Error::Empty {
            filename: filename.to_string(),
        })? / 1e3
    };

    let check_shape = |name: &str, array: &Array2<f64>| -> Result<()> {
        if array.dim() != (ntime, radial_distance.len()) {
            return Err(Error::UnexpectedDimensions {
                name: name.to_string(),
                filename: filename.to_string(),
            });
        }
        Ok(())
    };

    let cnr = read_2d(group, "cnr", filename)?;
    let relative_beta = read_2d(group, "relative_beta", filename)?;
    let radial_velocity = read_2d(group, "radial_wind_speed", filename)?;
    let radial_velocity_confidence = read_2d(group, "radial_wind_speed_ci", filename)?;
    let doppler_spectrum_width = read_2d(group, "doppler_spectrum_width", filename)?;
    check_shape("cnr", &cnr)?;
    check_shape("relative_beta", &relative_beta)?;
    check_shape("radial_wind_speed", &radial_velocity)?;
    check_shape("radial_wind_speed_ci", &radial_velocity_confidence)?;
    check_shape("doppler_spectrum_width", &doppler_spectrum_width)?;

    Ok(WindCubeFixed {
        time,
        radial_distance,
        azimuth: per_time_angle("azimuth")?,
        elevation: per_time_angle("elevation")?,
        cnr,
        relative_beta,
        radial_velocity,
        radial_velocity_confidence,
        doppler_spectrum_width,
        ray_accumulation_time: accumulation,
        system_id: system_id.to_string(),
    })
}

fn read_vad_group(
    group: &netcdf::Group,
    scan_number: i64,
    system_id: &str,
    filename: &str,
) -> Result<WindCubeVad> {
    let reference = file_time_reference(group);
    let time = read_time(group, reference.as_deref(), filename)?;
    let ntime = time.len();

    for (name, units) in [
        ("cnr", &["dB"][..]),
        ("radial_wind_speed", &["m s-1"][..]),
        ("radial_wind_speed_ci", &["percent", "%"][..]),
        ("azimuth", &["degrees"][..]),
        ("elevation", &["degrees"][..]),
        ("range", &["m"][..]),
        ("measurement_height", &["m"][..]),
    ] {
        check_units(&variable(group, name, filename)?, units, name, filename)?;
    }

    let radial_distance = read_constant_rows(group, "range", filename)?;
    let height = read_constant_rows(group, "measurement_height", filename)?;

    let check_shape = |name: &str, array: &Array2<f64>| -> Result<()> {
        if array.dim() != (ntime, radial_distance.len()) {
            return Err(Error::UnexpectedDimensions {
                name: name.to_string(),
                filename: filename.to_string(),
            });
        }
        Ok(())
    };

    let cnr = read_2d(group, "cnr", filename)?;
    let radial_velocity = read_2d(group, "radial_wind_speed", filename)?;
    let radial_velocity_confidence = read_2d(group, "radial_wind_speed_ci", filename)?;
    check_shape("cnr", &cnr)?;
    check_shape("radial_wind_speed", &radial_velocity)?;
    check_shape("radial_wind_speed_ci", &radial_velocity_confidence)?;

    Ok(WindCubeVad {
        time,
        radial_distance,
        height,
        azimuth: read_1d(group, "azimuth", filename)?,
        elevation: read_1d(group, "elevation", filename)?,
        cnr,
        radial_velocity,
        radial_velocity_confidence,
        scan_index: vec![scan_number; ntime],
        system_id: system_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_decode_cf_time_seconds() {
        let time = decode_cf_time(
            &[0.0, 1.5],
            "seconds since 1970-01-01 00:00:00",
            None,
            "test.nc",
        )
        .unwrap();
        assert_eq!(time, vec![0, 1_500_000]);
    }

    #[test]
    fn test_decode_cf_time_reference_override() {
        let time = decode_cf_time(
            &[60.0],
            "seconds since 1970-01-01 00:00:00",
            Some("2023-01-01T06:00:00Z"),
            "test.nc",
        )
        .unwrap();
        assert_eq!(time, vec![1_672_552_800_000_000 + 60_000_000]);
    }

    #[test]
    fn test_decode_cf_time_rejects_unknown_unit() {
        let result = decode_cf_time(&[0.0], "fortnights since 1970-01-01", None, "test.nc");
        assert!(matches!(result, Err(Error::InvalidTimestamp { .. })));
    }

    fn vad_record(scan_index: Vec<i64>) -> WindCubeVad {
        let ntime = scan_index.len();
        WindCubeVad {
            time: (0..ntime as i64).map(|i| i * 1_000_000).collect(),
            radial_distance: array![50.0, 100.0],
            height: array![48.0, 96.0],
            azimuth: Array1::zeros(ntime),
            elevation: Array1::from_elem(ntime, 75.0),
            cnr: Array2::zeros((ntime, 2)),
            radial_velocity: Array2::zeros((ntime, 2)),
            radial_velocity_confidence: Array2::zeros((ntime, 2)),
            scan_index,
            system_id: "WLS200S-197".to_string(),
        }
    }

    #[test]
    fn test_sweep_names_sort_by_trailing_number() {
        let mut names = vec![
            "Sweep_10".to_string(),
            "Sweep_2".to_string(),
            "Sweep_1".to_string(),
        ];
        sort_by_sweep_number(&mut names);
        assert_eq!(names, vec!["Sweep_1", "Sweep_2", "Sweep_10"]);

        // Names without a trailing number keep a stable lexicographic order up front.
        let mut names = vec!["Sweep_3".to_string(), "Sweep".to_string()];
        sort_by_sweep_number(&mut names);
        assert_eq!(names, vec!["Sweep", "Sweep_3"]);
    }

    #[test]
    fn test_vad_merge_keeps_scans_distinct() {
        let a = vad_record(vec![0, 0, 1]);
        let b = vad_record(vec![0, 1, 1]);
        let merged = WindCubeVad::merge(&[a, b]).unwrap();
        assert_eq!(merged.scan_index, vec![0, 0, 1, 2, 3, 3]);
    }

    #[test]
    fn test_reindexed_scan_indices() {
        let mut record = vad_record(vec![4, 4, 7, 7, 2]);
        record = record.reindexed_scan_indices();
        assert_eq!(record.scan_index, vec![0, 0, 1, 1, 2]);
    }
}
