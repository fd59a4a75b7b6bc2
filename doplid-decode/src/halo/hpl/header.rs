use crate::result::{Error, Result};
use crate::util::{common_prefix, merge_all_equal, parse_f64, parse_i64};
use chrono::NaiveDateTime;
use std::collections::HashMap;

/// Header of a Halo `.hpl` file: the key-value section before the `****` divider.
#[derive(Debug, Clone, PartialEq)]
pub struct HaloHplHeader {
    pub filename: String,
    pub gate_points: i64,
    pub nrays: Option<i64>,
    pub nwaypoints: Option<i64>,
    pub ngates: usize,
    pub pulses_per_ray: i64,
    pub range_gate_length: f64,
    pub resolution: f64,
    pub scan_type: String,
    pub focus_range: i64,
    /// File start time in microseconds since the Unix epoch.
    pub start_time: i64,
    pub system_id: String,
    pub instrument_spectral_width: Option<f64>,
}

/// Fingerprint of the header fields that must agree for two files to be merged. Floats with
/// device jitter are rounded to one decimal and stored as scaled integers so the key can be
/// hashed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeKey {
    gate_points: i64,
    nrays: Option<i64>,
    nwaypoints: Option<i64>,
    ngates: usize,
    pulses_per_ray: i64,
    range_gate_length_tenths: i64,
    resolution_tenths: i64,
    scan_type: String,
    focus_range: i64,
    system_id: String,
    instrument_spectral_width_tenths: Option<i64>,
}

fn tenths(value: f64) -> i64 {
    (value * 10.0).round() as i64
}

impl HaloHplHeader {
    /// The merge fingerprint of this header.
    pub fn merge_key(&self) -> MergeKey {
        MergeKey {
            gate_points: self.gate_points,
            nrays: self.nrays,
            nwaypoints: self.nwaypoints,
            ngates: self.ngates,
            pulses_per_ray: self.pulses_per_ray,
            range_gate_length_tenths: tenths(self.range_gate_length),
            resolution_tenths: tenths(self.resolution),
            scan_type: self.scan_type.clone(),
            focus_range: self.focus_range,
            system_id: self.system_id.clone(),
            instrument_spectral_width_tenths: self.instrument_spectral_width.map(tenths),
        }
    }

    /// Merge headers of files that share a fingerprint: the filename becomes the common prefix,
    /// the start time the earliest, and every other field must be equal.
    pub fn merged(headers: &[&HaloHplHeader]) -> Result<HaloHplHeader> {
        let filenames: Vec<&str> = headers.iter().map(|h| h.filename.as_str()).collect();
        let start_time = headers
            .iter()
            .map(|h| h.start_time)
            .min()
            .ok_or_else(|| Error::MergeMismatch {
                reason: "cannot merge an empty list of headers".to_string(),
            })?;
        Ok(HaloHplHeader {
            filename: common_prefix(&filenames),
            start_time,
            gate_points: merge_all_equal(
                "gate_points",
                &headers.iter().map(|h| h.gate_points).collect::<Vec<_>>(),
            )?,
            nrays: merge_all_equal("nrays", &headers.iter().map(|h| h.nrays).collect::<Vec<_>>())?,
            nwaypoints: merge_all_equal(
                "nwaypoints",
                &headers.iter().map(|h| h.nwaypoints).collect::<Vec<_>>(),
            )?,
            ngates: merge_all_equal("ngates", &headers.iter().map(|h| h.ngates).collect::<Vec<_>>())?,
            pulses_per_ray: merge_all_equal(
                "pulses_per_ray",
                &headers.iter().map(|h| h.pulses_per_ray).collect::<Vec<_>>(),
            )?,
            range_gate_length: merge_all_equal(
                "range_gate_length",
                &headers
                    .iter()
                    .map(|h| h.range_gate_length)
                    .collect::<Vec<_>>(),
            )?,
            resolution: merge_all_equal(
                "resolution",
                &headers.iter().map(|h| h.resolution).collect::<Vec<_>>(),
            )?,
            scan_type: merge_all_equal(
                "scan_type",
                &headers
                    .iter()
                    .map(|h| h.scan_type.clone())
                    .collect::<Vec<_>>(),
            )?,
            focus_range: merge_all_equal(
                "focus_range",
                &headers.iter().map(|h| h.focus_range).collect::<Vec<_>>(),
            )?,
            system_id: merge_all_equal(
                "system_id",
                &headers
                    .iter()
                    .map(|h| h.system_id.clone())
                    .collect::<Vec<_>>(),
            )?,
            instrument_spectral_width: merge_all_equal(
                "instrument_spectral_width",
                &headers
                    .iter()
                    .map(|h| h.instrument_spectral_width)
                    .collect::<Vec<_>>(),
            )?,
        })
    }
}

/// Rows that appear in `.hpl` headers without a `:\t` key-value delimiter. Anything else
/// unrecognised is a parse error.
const EXPECTED_HEADER_ROWS: [&str; 9] = [
    "Altitude of measurement (center of gate) = (range gate + 0.5) * Gate length",
    "Range of measurement (center of gate) = (range gate + 0.5) * Gate length",
    "Data line 1: Decimal time (hours)  Azimuth (degrees)  Elevation (degrees) \
     Pitch (degrees) Roll (degrees)",
    "Data line 1: Decimal time (hours)  Azimuth (degrees)  Elevation (degrees)",
    "f9.6,1x,f6.2,1x,f6.2",
    "Data line 2: Range Gate  Doppler (m/s)  Intensity (SNR + 1)  Beta (m-1 sr-1)",
    "Data line 2: Range Gate  Doppler (m/s)  Intensity (SNR + 1)  Beta (m-1 sr-1) \
     Spectral Width",
    "i3,1x,f6.4,1x,f8.6,1x,e12.6 - repeat for no. gates",
    "i3,1x,f6.4,1x,f8.6,1x,e12.6,1x,f6.4 - repeat for no. gates",
];

const SPECTRAL_WIDTH_PREFIX: &str = "**** Instrument spectral width = ";

/// Parse the header section (everything before the data profiles) into a typed header.
pub(super) fn parse_header(lines: &[&str], filename: &str) -> Result<HaloHplHeader> {
    let mut fields: HashMap<&str, &str> = HashMap::new();
    let mut spectral_width = None;

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(value) = line.strip_prefix(SPECTRAL_WIDTH_PREFIX) {
            spectral_width = Some(parse_f64(value, "instrument spectral width", filename)?);
        } else if let Some((key, value)) = line.split_once(":\t") {
            fields.insert(key, value);
        } else if line != "****" && !EXPECTED_HEADER_ROWS.contains(&line) {
            return Err(Error::UnexpectedHeaderRow {
                row: line.to_string(),
                filename: filename.to_string(),
            });
        }
    }

    let field = |key: &str| -> Result<&str> {
        fields.get(key).copied().ok_or_else(|| Error::MissingHeaderKey {
            key: key.to_string(),
            filename: filename.to_string(),
        })
    };

    let start_time_raw = field("Start time")?;
    let start_time = NaiveDateTime::parse_from_str(start_time_raw.trim(), "%Y%m%d %H:%M:%S%.f")
        .map_err(|_| Error::InvalidTimestamp {
            value: start_time_raw.to_string(),
            filename: filename.to_string(),
        })?
        .and_utc()
        .timestamp_micros();

    Ok(HaloHplHeader {
        filename: field("Filename")?.trim().to_string(),
        gate_points: parse_i64(field("Gate length (pts)")?, "gate points", filename)?,
        nrays: match fields.get("No. of rays in file") {
            Some(value) => Some(parse_i64(value, "number of rays", filename)?),
            None => None,
        },
        nwaypoints: match fields.get("No. of waypoints in file") {
            Some(value) => Some(parse_i64(value, "number of waypoints", filename)?),
            None => None,
        },
        ngates: parse_i64(field("Number of gates")?, "number of gates", filename)? as usize,
        pulses_per_ray: parse_i64(field("Pulses/ray")?, "pulses per ray", filename)?,
        range_gate_length: parse_f64(field("Range gate length (m)")?, "range gate length", filename)?,
        resolution: parse_f64(field("Resolution (m/s)")?, "resolution", filename)?,
        scan_type: field("Scan type")?.trim().to_string(),
        focus_range: parse_i64(field("Focus range")?, "focus range", filename)?,
        start_time,
        system_id: field("System ID")?.trim().to_string(),
        instrument_spectral_width: spectral_width,
    })
}
