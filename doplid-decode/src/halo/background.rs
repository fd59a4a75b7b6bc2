//!
//! Reader for Halo `Background_DDMMYY-HHMMSS.txt` files.
//!
//! A background file carries one per-gate background-signal profile; the measurement time is
//! encoded in the filename only. The body is either CRLF-separated decimal numbers or, in
//! files written without line breaks, a continuous run of floats with exactly six decimals.
//!

use crate::result::{Error, Result};
use crate::source::Source;
use crate::util::{argsort, strictly_increasing_indices};
use chrono::NaiveDateTime;
use ndarray::{s, Array2, Axis};

const NUMBER_OF_DECIMALS: usize = 6;

/// One or more background-signal profiles on a shared gate grid.
#[derive(Debug, Clone, PartialEq)]
pub struct HaloBg {
    /// Measurement timestamps in microseconds since the Unix epoch, dim (time,).
    pub time: Vec<i64>,
    /// Background signal, dim (time, range).
    pub signal: Array2<f64>,
}

impl HaloBg {
    /// Decode a single background byte source. The filename is required to carry the
    /// `Background_DDMMYY-HHMMSS.txt` timestamp.
    pub fn from_source(source: &Source) -> Result<Self> {
        let filename = source.filename();
        let time = parse_filename_time(filename)?;

        let body = String::from_utf8_lossy(source.bytes());
        let body = body.trim();
        if body.is_empty() {
            return Err(Error::Empty {
                filename: filename.to_string(),
            });
        }

        let values = if body.contains("\r\n") {
            parse_lines(body, filename)?
        } else {
            parse_without_newlines(body, filename)?
        };

        let signal = Array2::from_shape_vec((1, values.len()), values).map_err(|_| Error::Empty {
            filename: filename.to_string(),
        })?;
        Ok(Self {
            time: vec![time],
            signal,
        })
    }

    /// Number of range gates.
    pub fn ngates(&self) -> usize {
        self.signal.ncols()
    }

    /// Number of profiles.
    pub fn ntime(&self) -> usize {
        self.time.len()
    }

    /// A new record containing the given profiles, in the given order.
    pub fn select(&self, rows: &[usize]) -> Self {
        Self {
            time: rows.iter().map(|&i| self.time[i]).collect(),
            signal: self.signal.select(Axis(0), rows),
        }
    }

    /// A copy truncated to the first `ngates` range gates. Background files written alongside
    /// stares with fewer gates carry trailing unused gates.
    pub fn truncated_to_gates(&self, ngates: usize) -> Self {
        let keep = ngates.min(self.ngates());
        Self {
            time: self.time.clone(),
            signal: self.signal.slice(s![.., ..keep]).to_owned(),
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

    /// A copy with every profile dropped that contains a NaN signal value.
    pub fn nans_removed(&self) -> Self {
        let rows: Vec<usize> = (0..self.ntime())
            .filter(|&row| self.signal.row(row).iter().all(|value| value.is_finite()))
            .collect();
        self.select(&rows)
    }

    /// Merge records by concatenating along time. The gate counts must agree.
    pub fn merge(records: &[HaloBg]) -> Result<HaloBg> {
        let first = records.first().ok_or_else(|| Error::MergeMismatch {
            reason: "cannot merge an empty list of records".to_string(),
        })?;
        if records.iter().any(|r| r.ngates() != first.ngates()) {
            return Err(Error::MergeMismatch {
                reason: "background gate counts differ between files".to_string(),
            });
        }
        let views: Vec<_> = records.iter().map(|r| r.signal.view()).collect();
        Ok(HaloBg {
            time: records.iter().flat_map(|r| r.time.iter().copied()).collect(),
            signal: ndarray::concatenate(Axis(0), &views).map_err(|err| Error::MergeMismatch {
                reason: err.to_string(),
            })?,
        })
    }
}

fn parse_filename_time(filename: &str) -> Result<i64> {
    let bad = || Error::BadBackgroundFilename {
        filename: filename.to_string(),
    };
    let stamp = filename
        .strip_prefix("Background_")
        .and_then(|rest| rest.strip_suffix(".txt"))
        .ok_or_else(bad)?;
    let parsed = NaiveDateTime::parse_from_str(stamp, "%d%m%y-%H%M%S").map_err(|_| bad())?;
    Ok(parsed.and_utc().timestamp_micros())
}

fn parse_lines(body: &str, filename: &str) -> Result<Vec<f64>> {
    let parse = |line: &str| -> Option<f64> { line.trim().parse::<f64>().ok() };
    let lines: Vec<&str> = body.split("\r\n").collect();
    let values: Option<Vec<f64>> = lines.iter().map(|line| parse(line)).collect();
    if let Some(values) = values {
        return Ok(values);
    }
    // Some instruments write decimal commas.
    lines
        .iter()
        .map(|line| {
            let line = line.replace(',', ".");
            line.trim().parse::<f64>().map_err(|_| Error::InvalidNumber {
                value: line.clone(),
                what: "background signal",
                filename: filename.to_string(),
            })
        })
        .collect()
}

/// Tokenise a body without line breaks: every decimal point is followed by exactly six decimal
/// digits, so each token ends six digits after its point.
fn parse_without_newlines(body: &str, filename: &str) -> Result<Vec<f64>> {
    let bytes = body.as_bytes();
    let mut values = Vec::new();
    let mut start = 0;
    for (index, &byte) in bytes.iter().enumerate() {
        if byte != b'.' {
            continue;
        }
        let end = index + 1 + NUMBER_OF_DECIMALS;
        if end < start || end > bytes.len() {
            return Err(Error::InvalidNumber {
                value: body[start..].to_string(),
                what: "background signal",
                filename: filename.to_string(),
            });
        }
        let token = &body[start..end];
        values.push(token.parse::<f64>().map_err(|_| Error::InvalidNumber {
            value: token.to_string(),
            what: "background signal",
            filename: filename.to_string(),
        })?);
        start = end;
    }
    if start != bytes.len() || values.is_empty() {
        return Err(Error::InvalidNumber {
            value: body[start..].to_string(),
            what: "background signal",
            filename: filename.to_string(),
        });
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_crlf_body() {
        let source = Source::from_bytes("Background_010123-060000.txt", "1.000000\r\n2.000000\r\n3.000000");
        let bg = HaloBg::from_source(&source).unwrap();
        assert_eq!(bg.ngates(), 3);
        assert_eq!(bg.ntime(), 1);
        // 2023-01-01 06:00 UTC
        assert_eq!(bg.time[0], 1_672_552_800_000_000);
        assert_abs_diff_eq!(bg.signal[(0, 1)], 2.0);
    }

    #[test]
    fn test_body_without_newlines() {
        let source = Source::from_bytes("Background_010123-060000.txt", "1.0000002.000000-3.000000");
        let bg = HaloBg::from_source(&source).unwrap();
        assert_eq!(bg.ngates(), 3);
        assert_abs_diff_eq!(bg.signal[(0, 2)], -3.0);
    }

    #[test]
    fn test_decimal_commas_are_recovered() {
        let source = Source::from_bytes("Background_010123-060000.txt", "1,500000\r\n2,000000");
        let bg = HaloBg::from_source(&source).unwrap();
        assert_abs_diff_eq!(bg.signal[(0, 0)], 1.5);
    }

    #[test]
    fn test_non_numeric_body_is_an_error() {
        let source = Source::from_bytes("Background_010123-060000.txt", "1.000000\r\ngarbage");
        assert!(matches!(
            HaloBg::from_source(&source),
            Err(Error::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_bad_filename_is_an_error() {
        let source = Source::from_bytes("background.txt", "1.000000\r\n2.000000");
        assert!(matches!(
            HaloBg::from_source(&source),
            Err(Error::BadBackgroundFilename { .. })
        ));
    }

    #[test]
    fn test_truncated_to_gates() {
        let source = Source::from_bytes("Background_010123-060000.txt", "1.000000\r\n2.000000\r\n3.000000");
        let bg = HaloBg::from_source(&source).unwrap().truncated_to_gates(2);
        assert_eq!(bg.ngates(), 2);
    }
}
