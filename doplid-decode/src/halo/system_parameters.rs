//!
//! Reader for Halo `system_parameters_*.txt` housekeeping files.
//!
//! The format is seven tab-separated columns: a timestamp followed by internal temperature,
//! internal relative humidity, supply voltage, acquisition-card temperature and the platform
//! pitch and roll angles. Timestamps switch between 12-hour (`mm/dd/YYYY HH:MM:SS AM`) and
//! 24-hour (`dd/mm/YYYY HH:MM:SS`) conventions within one file, so the convention is detected
//! per row. Some instruments write defective rows in which pitch and roll are glued into one
//! token next to a filler `0` column; such rows are split back apart when every row of the file
//! shows the same defect.
//!

use crate::result::{Error, Result};
use crate::source::Source;
use crate::util::{argsort, strictly_increasing_indices};
use chrono::NaiveDateTime;
use ndarray::{Array1, Axis};

/// Housekeeping time series of a Halo instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct HaloSysParams {
    /// Timestamps in microseconds since the Unix epoch, dim (time,).
    pub time: Vec<i64>,
    /// Internal temperature in degrees Celsius, dim (time,).
    pub internal_temperature: Array1<f64>,
    /// Internal relative humidity in percent, dim (time,).
    pub internal_relative_humidity: Array1<f64>,
    /// Supply voltage in volts, dim (time,).
    pub supply_voltage: Array1<f64>,
    /// Acquisition-card temperature in degrees Celsius, dim (time,).
    pub acquisition_card_temperature: Array1<f64>,
    /// Platform pitch angle in degrees, dim (time,).
    pub platform_pitch_angle: Array1<f64>,
    /// Platform roll angle in degrees, dim (time,).
    pub platform_roll_angle: Array1<f64>,
}

impl HaloSysParams {
    /// Decode a single system-parameters byte source.
    pub fn from_source(source: &Source) -> Result<Self> {
        let filename = source.filename();
        let content = String::from_utf8_lossy(source.bytes())
            .replace('\0', "")
            .replace(',', ".");
        let rows: Vec<Vec<String>> = content
            .trim()
            .split("\r\n")
            .map(|row| row.trim().split('\t').map(str::to_string).collect())
            .collect();
        if rows.is_empty() || rows[0].iter().all(|field| field.is_empty()) {
            return Err(Error::Empty {
                filename: filename.to_string(),
            });
        }

        let rows = correct_concatenated_rows(rows, filename)?;

        let mut time = Vec::with_capacity(rows.len());
        let mut values: Vec<Vec<f64>> = vec![Vec::with_capacity(rows.len()); 6];
        for row in &rows {
            if row.len() != 7 {
                return Err(Error::BadSystemParameters {
                    filename: filename.to_string(),
                    reason: format!("expected 7 columns, found {}", row.len()),
                });
            }
            time.push(parse_row_time(&row[0], filename)?);
            for (column, value) in row[1..].iter().enumerate() {
                values[column].push(value.trim().parse::<f64>().map_err(|_| {
                    Error::InvalidNumber {
                        value: value.clone(),
                        what: "system parameter",
                        filename: filename.to_string(),
                    }
                })?);
            }
        }

        let mut columns = values.into_iter().map(Array1::from_vec);
        Ok(Self {
            time,
            internal_temperature: columns.next().unwrap_or_default(),
            internal_relative_humidity: columns.next().unwrap_or_default(),
            supply_voltage: columns.next().unwrap_or_default(),
            acquisition_card_temperature: columns.next().unwrap_or_default(),
            platform_pitch_angle: columns.next().unwrap_or_default(),
            platform_roll_angle: columns.next().unwrap_or_default(),
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
            internal_temperature: self.internal_temperature.select(Axis(0), rows),
            internal_relative_humidity: self.internal_relative_humidity.select(Axis(0), rows),
            supply_voltage: self.supply_voltage.select(Axis(0), rows),
            acquisition_card_temperature: self.acquisition_card_temperature.select(Axis(0), rows),
            platform_pitch_angle: self.platform_pitch_angle.select(Axis(0), rows),
            platform_roll_angle: self.platform_roll_angle.select(Axis(0), rows),
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

    /// A copy with every sample dropped that contains a NaN, such as rows recovered from
    /// irrecoverably glued pitch/roll columns.
    pub fn nans_removed(&self) -> Self {
        let rows: Vec<usize> = (0..self.ntime())
            .filter(|&row| {
                [
                    &self.internal_temperature,
                    &self.internal_relative_humidity,
                    &self.supply_voltage,
                    &self.acquisition_card_temperature,
                    &self.platform_pitch_angle,
                    &self.platform_roll_angle,
                ]
                .iter()
                .all(|column| column[row].is_finite())
            })
            .collect();
        self.select(&rows)
    }

    /// Merge records by concatenating along time.
    pub fn merge(records: &[HaloSysParams]) -> Result<HaloSysParams> {
        let concat = |get: fn(&HaloSysParams) -> &Array1<f64>| -> Result<Array1<f64>> {
            let views: Vec<_> = records.iter().map(|r| get(r).view()).collect();
            ndarray::concatenate(Axis(0), &views).map_err(|err| Error::MergeMismatch {
                reason: err.to_string(),
            })
        };
        if records.is_empty() {
            return Err(Error::MergeMismatch {
                reason: "cannot merge an empty list of records".to_string(),
            });
        }
        Ok(HaloSysParams {
            time: records.iter().flat_map(|r| r.time.iter().copied()).collect(),
            internal_temperature: concat(|r| &r.internal_temperature)?,
            internal_relative_humidity: concat(|r| &r.internal_relative_humidity)?,
            supply_voltage: concat(|r| &r.supply_voltage)?,
            acquisition_card_temperature: concat(|r| &r.acquisition_card_temperature)?,
            platform_pitch_angle: concat(|r| &r.platform_pitch_angle)?,
            platform_roll_angle: concat(|r| &r.platform_roll_angle)?,
        })
    }
}

fn parse_row_time(value: &str, filename: &str) -> Result<i64> {
    let value = value.trim();
    NaiveDateTime::parse_from_str(value, "%m/%d/%Y %I:%M:%S %p")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%d/%m/%Y %H:%M:%S"))
        .map(|parsed| parsed.and_utc().timestamp_micros())
        .map_err(|_| Error::InvalidTimestamp {
            value: value.to_string(),
            filename: filename.to_string(),
        })
}

fn is_glued(field: &str) -> bool {
    field.matches('.').count() >= 2
}

/// Whether the field is an irrecoverably glued pair `<num>.<num>.<num>`; the digits of the
/// boundary are lost, so both values become NaN.
fn is_irrecoverable(field: &str) -> bool {
    let rest = field.strip_prefix(['+', '-']).unwrap_or(field);
    rest.matches('.').count() == 2
        && !rest.is_empty()
        && rest.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn split_glued(field: &str) -> Option<(String, String)> {
    let bytes = field.as_bytes();
    for position in 1..bytes.len() {
        if (bytes[position] == b'+' || bytes[position] == b'-')
            && bytes[position - 1].is_ascii_digit()
        {
            let (left, right) = field.split_at(position);
            if left.parse::<f64>().is_ok() && right.parse::<f64>().is_ok() {
                return Some((left.to_string(), right.to_string()));
            }
        }
    }
    None
}

/// Recover rows in which two floats were written glued together next to a filler `0` column.
/// Either every row shows the defect or none may; a mixed file cannot be interpreted.
fn correct_concatenated_rows(
    rows: Vec<Vec<String>>,
    filename: &str,
) -> Result<Vec<Vec<String>>> {
    let glued: Vec<bool> = rows
        .iter()
        .map(|row| row.iter().skip(1).any(|field| is_glued(field)))
        .collect();
    if glued.iter().all(|&g| !g) {
        return Ok(rows);
    }
    if !glued.iter().all(|&g| g) {
        return Err(Error::BadSystemParameters {
            filename: filename.to_string(),
            reason: "cannot correct the concatenated rows".to_string(),
        });
    }

    rows.into_iter()
        .map(|mut row| {
            let zero = row.iter().position(|field| field == "0").ok_or_else(|| {
                Error::BadSystemParameters {
                    filename: filename.to_string(),
                    reason: "concatenated rows are expected to have a filler zero column"
                        .to_string(),
                }
            })?;
            row.remove(zero);

            let position = row
                .iter()
                .skip(1)
                .position(|field| is_glued(field))
                .map(|p| p + 1)
                .ok_or_else(|| Error::BadSystemParameters {
                    filename: filename.to_string(),
                    reason: "glued column vanished while correcting rows".to_string(),
                })?;
            let field = row.remove(position);
            let (left, right) = match split_glued(&field) {
                Some(pair) => pair,
                None if is_irrecoverable(&field) => ("nan".to_string(), "nan".to_string()),
                None => {
                    return Err(Error::BadSystemParameters {
                        filename: filename.to_string(),
                        reason: format!("cannot separate concatenated floats '{field}'"),
                    })
                }
            };
            row.insert(position, right);
            row.insert(position, left);
            Ok(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_mixed_timestamp_conventions() {
        let content = "01/31/2023 11:59:59 PM\t31.2\t12.0\t11.9\t39.0\t0.1\t-0.2\r\n\
                       01/02/2023 00:00:09\t31.3\t12.1\t11.9\t39.1\t0.1\t-0.2";
        let source = Source::from_bytes("system_parameters_213_202301.txt", content);
        let params = HaloSysParams::from_source(&source).unwrap();
        assert_eq!(params.ntime(), 2);
        // 12-hour row is January 31st, 24-hour row is February 1st.
        assert!(params.time[1] > params.time[0]);
        assert_abs_diff_eq!(params.internal_temperature[0], 31.2);
        assert_abs_diff_eq!(params.platform_roll_angle[1], -0.2);
    }

    #[test]
    fn test_glued_rows_are_recovered() {
        let content = "01/31/2023 11:59:59 PM\t31.2\t12.0\t11.9\t0\t39.0\t0.12-0.25\r\n\
                       01/31/2023 11:59:59 PM\t31.3\t12.1\t11.9\t0\t39.1\t1.00.5";
        let source = Source::from_bytes("system_parameters_213_202301.txt", content);
        let params = HaloSysParams::from_source(&source).unwrap();
        assert_abs_diff_eq!(params.platform_pitch_angle[0], 0.12);
        assert_abs_diff_eq!(params.platform_roll_angle[0], -0.25);
        assert!(params.platform_pitch_angle[1].is_nan());
        assert!(params.platform_roll_angle[1].is_nan());
    }

    #[test]
    fn test_partially_glued_file_is_an_error() {
        let content = "01/31/2023 11:59:59 PM\t31.2\t12.0\t11.9\t0\t39.0\t0.12-0.25\r\n\
                       01/31/2023 11:59:59 PM\t31.3\t12.1\t11.9\t39.1\t0.1\t-0.2";
        let source = Source::from_bytes("system_parameters_213_202301.txt", content);
        assert!(matches!(
            HaloSysParams::from_source(&source),
            Err(Error::BadSystemParameters { .. })
        ));
    }

    #[test]
    fn test_wrong_column_count_is_an_error() {
        let source = Source::from_bytes(
            "system_parameters_213_202301.txt",
            "01/31/2023 11:59:59 PM\t31.2\t12.0",
        );
        assert!(matches!(
            HaloSysParams::from_source(&source),
            Err(Error::BadSystemParameters { .. })
        ));
    }
}
