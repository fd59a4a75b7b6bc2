//!
//! Reader for WLS77 row-oriented ASCII files.
//!
//! The WLS77 format mirrors the WLS70 one: a `key=value` header with the system id, CNR
//! threshold and altitude grid, then tab-separated rows with eight repeating fields per
//! altitude. It differs in the per-row wiper field (a cycle count rather than an on/off state)
//! and in reporting the horizontal wind speed instead of `vh`.
//!

use crate::result::{Error, Result};
use crate::source::Source;
use crate::util::{argsort, grids_close, merge_all_equal, strictly_increasing_indices};
use crate::wls70::{block_column, parse_ascii_header, parse_ascii_rows};
use ndarray::{Array1, Array2, Axis};

const COMPONENT_LIMIT: f64 = 90.0;

/// One decoded WLS77 file.
#[derive(Debug, Clone, PartialEq)]
pub struct Wls77 {
    /// Sample timestamps in microseconds since the Unix epoch, dim (time,).
    pub time: Vec<i64>,
    /// Measurement altitudes in meters, dim (altitude,).
    pub altitude: Array1<f64>,
    /// Scanner position per sample, dim (time,).
    pub position: Array1<f64>,
    /// Internal temperature in degrees Celsius, dim (time,).
    pub temperature: Array1<f64>,
    /// Wiper cycle count, dim (time,).
    pub wiper_count: Array1<f64>,
    /// Carrier-to-noise ratio in dB, dim (time, altitude).
    pub cnr: Array2<f64>,
    /// Radial wind speed in m/s, dim (time, altitude).
    pub radial_velocity: Array2<f64>,
    /// Radial wind speed deviation in m/s, dim (time, altitude).
    pub radial_velocity_deviation: Array2<f64>,
    /// Horizontal wind speed in m/s, dim (time, altitude).
    pub wind_speed: Array2<f64>,
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

impl Wls77 {
    /// Decode a single WLS77 byte source.
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
            wiper_count: Array1::from_iter(prefix.iter().map(|row| row[2])),
            cnr: block_column(&blocks, naltitudes, 0),
            radial_velocity: block_column(&blocks, naltitudes, 1),
            radial_velocity_deviation: block_column(&blocks, naltitudes, 2),
            wind_speed: block_column(&blocks, naltitudes, 3),
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
            wiper_count: self.wiper_count.select(Axis(0), rows),
            cnr: self.cnr.select(Axis(0), rows),
            radial_velocity: self.radial_velocity.select(Axis(0), rows),
            radial_velocity_deviation: self.radial_velocity_deviation.select(Axis(0), rows),
            wind_speed: self.wind_speed.select(Axis(0), rows),
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
    pub fn merge(records: &[Wls77]) -> Result<Wls77> {
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
        let concat_1d = |get: fn(&Wls77) -> &Array1<f64>| -> Result<Array1<f64>> {
            let views: Vec<_> = records.iter().map(|r| get(r).view()).collect();
            ndarray::concatenate(Axis(0), &views).map_err(|err| Error::MergeMismatch {
                reason: err.to_string(),
            })
        };
        let concat_2d = |get: fn(&Wls77) -> &Array2<f64>| -> Result<Array2<f64>> {
            let views: Vec<_> = records.iter().map(|r| get(r).view()).collect();
            ndarray::concatenate(Axis(0), &views).map_err(|err| Error::MergeMismatch {
                reason: err.to_string(),
            })
        };
        Ok(Wls77 {
            time: records.iter().flat_map(|r| r.time.iter().copied()).collect(),
            altitude: first.altitude.clone(),
            position: concat_1d(|r| &r.position)?,
            temperature: concat_1d(|r| &r.temperature)?,
            wiper_count: concat_1d(|r| &r.wiper_count)?,
            cnr: concat_2d(|r| &r.cnr)?,
            radial_velocity: concat_2d(|r| &r.radial_velocity)?,
            radial_velocity_deviation: concat_2d(|r| &r.radial_velocity_deviation)?,
            wind_speed: concat_2d(|r| &r.wind_speed)?,
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

    fn wls77_file() -> String {
        let mut content = String::new();
        content.push_str("ID System=WLS77-12\r\n");
        content.push_str("CNR Threshold=-27.5\r\n");
        content.push_str("Altitudes(m)=50 75 100\r\n");
        content.push_str("Date\tPosition\tExtTemp\tWiperCount\t...\r\n");
        for (index, hour) in [6, 7].iter().enumerate() {
            content.push_str(&format!("01/01/2023 0{hour}:00:00\t0\t11.0\t{index}"));
            for altitude in 0..3 {
                let cnr = -20.0 - altitude as f64;
                content.push_str(&format!("\t{cnr}\t1.5\t0.2\t7.5\t225\t5.0\t5.0\t-0.1"));
            }
            content.push_str("\r\n");
        }
        content
    }

    #[test]
    fn test_minimal_file() {
        let raw = Wls77::from_source(&Source::from_bytes("wls77.rtd", wls77_file())).unwrap();
        assert_eq!(raw.ntime(), 2);
        assert_eq!(raw.altitude.len(), 3);
        assert_eq!(raw.system_id, "WLS77-12");
        assert_abs_diff_eq!(raw.cnr_threshold, -27.5);
        assert_abs_diff_eq!(raw.wind_speed[(1, 2)], 7.5);
        assert_abs_diff_eq!(raw.wiper_count[1], 1.0);
        assert!(raw.time[1] > raw.time[0]);
    }

    #[test]
    fn test_merge_requires_matching_system() {
        let a = Wls77::from_source(&Source::from_bytes("wls77.rtd", wls77_file())).unwrap();
        let mut b = a.clone();
        b.system_id = "WLS77-13".to_string();
        assert!(matches!(
            Wls77::merge(&[a, b]),
            Err(Error::MergeMismatch { .. })
        ));
    }
}
