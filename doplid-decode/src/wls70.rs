//!
//! Reader for WLS70 row-oriented ASCII files.
//!
//! A WLS70 file starts with a `key=value` header carrying the system id, the CNR threshold and
//! the altitude grid, terminated by a column-caption row. Each data row holds a timestamp, the
//! wiper state and housekeeping values followed by eight repeating fields per altitude:
//! `(cnr, radial wind speed, its deviation, horizontal speed, direction, u, v, w)`. Wind
//! components with a magnitude above 90 m/s are instrument error codes and become NaN.
//!

use crate::result::{Error, Result};
use crate::source::Source;
use crate::util::{argsort, grids_close, merge_all_equal, parse_f64, strictly_increasing_indices};
use chrono::NaiveDateTime;
use ndarray::{Array1, Array2, Axis};

/// Wind components above this magnitude are error codes, not measurements.
const COMPONENT_LIMIT: f64 = 90.0;

/// Fields per altitude block in one data row.
const BLOCK_WIDTH: usize = 8;

/// Per-row fields before the altitude blocks: timestamp, position, temperature, wiper.
const ROW_PREFIX: usize = 4;

/// One decoded WLS70 file.
#[derive(Debug, Clone, PartialEq)]
pub struct Wls70 {
    /// Sample timestamps in microseconds since the Unix epoch, dim (time,).
    pub time: Vec<i64>,
    /// Measurement altitudes in meters, dim (altitude,).
    pub altitude: Array1<f64>,
    /// Scanner position per sample, dim (time,).
    pub position: Array1<f64>,
    /// Internal temperature in degrees Celsius, dim (time,).
    pub temperature: Array1<f64>,
    /// Whether the wiper was active, dim (time,).
    pub wiper: Vec<bool>,
    /// Carrier-to-noise ratio in dB, dim (time, altitude).
    pub cnr: Array2<f64>,
    /// Radial wind speed in m/s, dim (time, altitude).
    pub radial_velocity: Array2<f64>,
    /// Radial wind speed deviation in m/s, dim (time, altitude).
    pub radial_velocity_deviation: Array2<f64>,
    /// Horizontal wind speed in m/s, dim (time, altitude).
    pub vh: Array2<f64>,
    /// Wind direction in degrees, dim (time, altitude).
    pub wind_direction: Array2<f64>,
    /// Zonal wind in m/s, dim (time, altitude).
    pub zonal_wind: Array2<f64>,
    /// Meridional wind in m/s, dim (time, altitude).
    pub meridional_wind: Array2<f64>,
    /// Vertical wind in m/s, dim (time, altitude).
    pub vertical_wind: Array2<f64>,
    pub system_id: String,
    pub cnr_threshold: f64,
}

pub(crate) struct AsciiHeader {
    pub altitude: Array1<f64>,
    pub system_id: String,
    pub cnr_threshold: f64,
    /// Index of the first data row.
    pub data_start: usize,
}

/// Parse the `key=value` header section shared by the WLS70 and WLS77 formats.
pub(crate) fn parse_ascii_header(lines: &[&str], filename: &str) -> Result<AsciiHeader> {
    let mut altitude = None;
    let mut system_id = None;
    let mut cnr_threshold = None;
    let mut data_start = lines.len();

    for (index, line) in lines.iter().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            // The first row without a delimiter is the column-caption row.
            data_start = index + 1;
            break;
        };
        let key = key.trim();
        if key.starts_with("Altitudes") {
            let values: Result<Vec<f64>> = value
                .split_whitespace()
                .map(|token| parse_f64(token, "altitude", filename))
                .collect();
            altitude = Some(Array1::from_vec(values?));
        } else if key == "ID System" {
            system_id = Some(value.trim().to_string());
        } else if key == "CNR Threshold" {
            cnr_threshold = Some(parse_f64(value, "cnr threshold", filename)?);
        }
    }

    let missing = |key: &str| Error::MissingHeaderKey {
        key: key.to_string(),
        filename: filename.to_string(),
    };
    Ok(AsciiHeader {
        altitude: altitude.ok_or_else(|| missing("Altitudes"))?,
        system_id: system_id.ok_or_else(|| missing("ID System"))?,
        cnr_threshold: cnr_threshold.ok_or_else(|| missing("CNR Threshold"))?,
        data_start,
    })
}

pub(crate) fn parse_row_timestamp(value: &str, filename: &str) -> Result<i64> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%d/%m/%Y %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%d/%m/%Y %H:%M"))
        .map(|parsed| parsed.and_utc().timestamp_micros())
        .map_err(|_| Error::InvalidTimestamp {
            value: value.to_string(),
            filename: filename.to_string(),
        })
}

/// Parse the tab-separated data rows into (time, per-row fields, altitude blocks).
pub(crate) fn parse_ascii_rows(
    lines: &[&str],
    naltitudes: usize,
    filename: &str,
) -> Result<(Vec<i64>, Vec<[f64; 3]>, Vec<Vec<f64>>)> {
    let expected = ROW_PREFIX + BLOCK_WIDTH * naltitudes;
    let mut time = Vec::new();
    let mut prefix = Vec::new();
    let mut blocks = Vec::new();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != expected {
            return Err(Error::InhomogeneousArray {
                filename: filename.to_string(),
            });
        }
        time.push(parse_row_timestamp(fields[0], filename)?);
        prefix.push([
            parse_f64(fields[1], "position", filename)?,
            parse_f64(fields[2], "temperature", filename)?,
            parse_f64(fields[3], "wiper", filename)?,
        ]);
        let values: Result<Vec<f64>> = fields[ROW_PREFIX..]
            .iter()
            .map(|token| parse_f64(token, "data value", filename))
            .collect();
        blocks.push(values?);
    }
    if time.is_empty() {
        return Err(Error::Empty {
            filename: filename.to_string(),
        });
    }
    Ok((time, prefix, blocks))
}

/// Extract one column of each altitude block into a (time, altitude) array.
pub(crate) fn block_column(blocks: &[Vec<f64>], naltitudes: usize, offset: usize) -> Array2<f64> {
    Array2::from_shape_fn((blocks.len(), naltitudes), |(row, alt)| {
        blocks[row][alt * BLOCK_WIDTH + offset]
    })
}

impl Wls70 {
    /// Decode a single WLS70 byte source.
    pub fn from_source(source: &Source) -> Result<Self> {
        let filename = source.filename();
        let content = String::from_utf8_lossy(source.bytes()).replace('\0', "");
        let lines: Vec<&str> = content.lines().collect();
        let header = parse_ascii_header(&lines, filename)?;
        let naltitudes = header.altitude.len();
        let (time, prefix, blocks) =
            parse_ascii_rows(&lines[header.data_start..], naltitudes, filename)?;

        let mut zonal_wind = block_column(&blocks, naltitudes, 5);
        let mut meridional_wind = block_column(&blocks, naltitudes, 6);
        let mut vertical_wind = block_column(&blocks, naltitudes, 7);
        ndarray::Zip::from(&mut zonal_wind)
            .and(&mut meridional_wind)
            .and(&mut vertical_wind)
            .for_each(|u, v, w| {
                if u.abs() > COMPONENT_LIMIT || v.abs() > COMPONENT_LIMIT || w.abs() > COMPONENT_LIMIT
                {
                    *u = f64::NAN;
                    *v = f64::NAN;
                    *w = f64::NAN;
                }
            });

        Ok(Self {
            time,
            altitude: header.altitude,
            position: Array1::from_iter(prefix.iter().map(|row| row[0])),
            temperature: Array1::from_iter(prefix.iter().map(|row| row[1])),
            wiper: prefix.iter().map(|row| (row[2] - 1.0).abs() < 1e-9).collect(),
            cnr: block_column(&blocks, naltitudes, 0),
            radial_velocity: block_column(&blocks, naltitudes, 1),
            radial_velocity_deviation: block_column(&blocks, naltitudes, 2),
            vh: block_column(&blocks, naltitudes, 3),
            wind_direction: block_column(&blocks, naltitudes, 4),
            zonal_wind,
            meridional_wind,
            vertical_wind,
            system_id: header.system_id,
            cnr_threshold: header.cnr_threshold,
        })
    }

    /// Number of samples.
    pub fn ntime(&self) -> usize {
        self.time.len()
    }

    /// A new record containing the given samples, in the given order.
    pub fn select(&self, rows: &[usize]) -> Self {
        Self {
            time: rows.iter().map(|&i| self.time[i]).collect(),
            altitude: self.altitude.clone(),
            position: self.position.select(Axis(0), rows),
            temperature: self.temperature.select(Axis(0), rows),
            wiper: rows.iter().map(|&i| self.wiper[i]).collect(),
            cnr: self.cnr.select(Axis(0), rows),
            radial_velocity: self.radial_velocity.select(Axis(0), rows),
            radial_velocity_deviation: self.radial_velocity_deviation.select(Axis(0), rows),
            vh: self.vh.select(Axis(0), rows),
            wind_direction: self.wind_direction.select(Axis(0), rows),
            zonal_wind: self.zonal_wind.select(Axis(0), rows),
            meridional_wind: self.meridional_wind.select(Axis(0), rows),
            vertical_wind: self.vertical_wind.select(Axis(0), rows),
            system_id: self.system_id.clone(),
            cnr_threshold: self.cnr_threshold,
        }
    }

    /// A copy sorted by time, ties keeping their original order.
    pub fn sorted_by_time(&self) -> Self {
        self.select(&argsort(&self.time))
    }

    /// A copy with every sample dropped whose time is not strictly greater than all earlier
    /// times.
    pub fn non_strictly_increasing_timesteps_removed(&self) -> Self {
        self.select(&strictly_increasing_indices(&self.time))
    }

    /// A copy with every sample dropped whose CNR or radial velocity contains a NaN. The wind
    /// components are left out of the check: their NaNs encode instrument error codes per
    /// cell, not broken rows.
    pub fn nans_removed(&self) -> Self {
        let rows: Vec<usize> = (0..self.ntime())
            .filter(|&row| {
                self.cnr.row(row).iter().all(|value| value.is_finite())
                    && self
                        .radial_velocity
                        .row(row)
                        .iter()
                        .all(|value| value.is_finite())
            })
            .collect();
        self.select(&rows)
    }

    /// Merge records by concatenating along time. The altitude grids, system ids and CNR
    /// thresholds must agree.
    pub fn merge(records: &[Wls70]) -> Result<Wls70> {
        let first = records.first().ok_or_else(|| Error::MergeMismatch {
            reason: "cannot merge an empty list of records".to_string(),
        })?;
        if records
            .iter()
            .any(|r| !grids_close(&r.altitude, &first.altitude, 1e-6))
        {
            return Err(Error::MergeMismatch {
                reason: "altitude grids differ between files".to_string(),
            });
        }
        let concat_1d = |get: fn(&Wls70) -> &Array1<f64>| -> Result<Array1<f64>> {
            let views: Vec<_> = records.iter().map(|r| get(r).view()).collect();
            ndarray::concatenate(Axis(0), &views).map_err(|err| Error::MergeMismatch {
                reason: err.to_string(),
            })
        };
        let concat_2d = |get: fn(&Wls70) -> &Array2<f64>| -> Result<Array2<f64>> {
            let views: Vec<_> = records.iter().map(|r| get(r).view()).collect();
            ndarray::concatenate(Axis(0), &views).map_err(|err| Error::MergeMismatch {
                reason: err.to_string(),
            })
        };
        Ok(Wls70 {
            time: records.iter().flat_map(|r| r.time.iter().copied()).collect(),
            altitude: first.altitude.clone(),
            position: concat_1d(|r| &r.position)?,
            temperature: concat_1d(|r| &r.temperature)?,
            wiper: records.iter().flat_map(|r| r.wiper.iter().copied()).collect(),
            cnr: concat_2d(|r| &r.cnr)?,
            radial_velocity: concat_2d(|r| &r.radial_velocity)?,
            radial_velocity_deviation: concat_2d(|r| &r.radial_velocity_deviation)?,
            vh: concat_2d(|r| &r.vh)?,
            wind_direction: concat_2d(|r| &r.wind_direction)?,
            zonal_wind: concat_2d(|r| &r.zonal_wind)?,
            meridional_wind: concat_2d(|r| &r.meridional_wind)?,
            vertical_wind: concat_2d(|r| &r.vertical_wind)?,
            system_id: merge_all_equal(
                "system_id",
                &records.iter().map(|r| r.system_id.clone()).collect::<Vec<_>>(),
            )?,
            cnr_threshold: merge_all_equal(
                "cnr_threshold",
                &records.iter().map(|r| r.cnr_threshold).collect::<Vec<_>>(),
            )?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn wls70_file(rows: &[(&str, [f64; 8], [f64; 8])]) -> String {
        let mut content = String::new();
        content.push_str("HeaderSize=5\r\n");
        content.push_str("ID System=WLS70-7\r\n");
        content.push_str("CNR Threshold=-22\r\n");
        content.push_str("Altitudes (m)=100 200\r\n");
        content.push_str("Timestamp\tPosition\tTemperature\tWiper\tCNR\t...\r\n");
        for (timestamp, first, second) in rows {
            content.push_str(timestamp);
            content.push_str("\t0\t12.5\t0");
            for block in [first, second] {
                for value in block {
                    content.push_str(&format!("\t{value}"));
                }
            }
            content.push_str("\r\n");
        }
        content
    }

    #[test]
    fn test_minimal_file() {
        let content = wls70_file(&[(
            "01/01/2023 06:00:00",
            [-15.0, 1.0, 0.1, 5.0, 270.0, 3.0, -1.0, 0.1],
            [-18.0, 1.2, 0.1, 6.0, 280.0, 4.0, -2.0, 0.2],
        )]);
        let raw = Wls70::from_source(&Source::from_bytes("wls70.rtd", content)).unwrap();
        assert_eq!(raw.ntime(), 1);
        assert_eq!(raw.altitude.len(), 2);
        assert_eq!(raw.system_id, "WLS70-7");
        assert_abs_diff_eq!(raw.cnr_threshold, -22.0);
        assert_abs_diff_eq!(raw.cnr[(0, 1)], -18.0);
        assert_abs_diff_eq!(raw.zonal_wind[(0, 0)], 3.0);
        assert_abs_diff_eq!(raw.vertical_wind[(0, 1)], 0.2);
        assert!(!raw.wiper[0]);
    }

    #[test]
    fn test_error_codes_become_nan() {
        let content = wls70_file(&[(
            "01/01/2023 06:00:00",
            [-15.0, 1.0, 0.1, 5.0, 270.0, 99.9, -1.0, 0.1],
            [-18.0, 1.2, 0.1, 6.0, 280.0, 4.0, -2.0, 0.2],
        )]);
        let raw = Wls70::from_source(&Source::from_bytes("wls70.rtd", content)).unwrap();
        assert!(raw.zonal_wind[(0, 0)].is_nan());
        assert!(raw.meridional_wind[(0, 0)].is_nan());
        assert!(raw.vertical_wind[(0, 0)].is_nan());
        assert_abs_diff_eq!(raw.zonal_wind[(0, 1)], 4.0);
    }

    #[test]
    fn test_wrong_column_count_is_an_error() {
        let mut content = wls70_file(&[(
            "01/01/2023 06:00:00",
            [-15.0, 1.0, 0.1, 5.0, 270.0, 3.0, -1.0, 0.1],
            [-18.0, 1.2, 0.1, 6.0, 280.0, 4.0, -2.0, 0.2],
        )]);
        content.push_str("01/01/2023 06:00:10\t0\t12.5\r\n");
        let result = Wls70::from_source(&Source::from_bytes("wls70.rtd", content));
        assert!(matches!(result, Err(Error::InhomogeneousArray { .. })));
    }
}
