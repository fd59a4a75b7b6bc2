//!
//! The horizontal-wind product: group profiles into conical scans, solve the VAD/DBS least
//! squares per scan and gate, and mask cells with a poor fit or implausible neighbour
//! differences.
//!

use crate::result::{Error, Result};
use crate::select::{select_vad_elevation, select_wind_records};
use doplid_decode::source::Source;
use doplid_decode::windcube::WindCubeVad;
use doplid_decode::wls70::Wls70;
use doplid_decode::halo::HaloHpl;
use doplid_model::data::Wind;
use log::warn;
use nalgebra::DMatrix;
use ndarray::{Array1, Array2};
use rayon::prelude::*;

/// Options shared by the wind constructors.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindOptions {
    /// Correction added to the instrument's azimuth before retrieval, in degrees. For
    /// instruments that already report horizontal components the correction is applied as a
    /// rotation of the component pair instead.
    pub azimuth_offset_deg: Option<f64>,
}

const MAX_TIME_GAP_IN_SCAN_MICROS: i64 = 30_000_000;
const MIN_PROFILES_PER_SCAN: usize = 4;
const RMSE_THRESHOLD: f64 = 5.0;
const NEIGHBOUR_DIFFERENCE_THRESHOLD: f64 = 20.0;

/// Build a wind product from Halo `.hpl` sources.
pub fn wind_from_halo(data: &[Source], options: &WindOptions) -> Result<Wind> {
    let raws: Vec<HaloHpl> = data
        .iter()
        .filter_map(|source| match HaloHpl::from_source(source) {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!("skipping {}: {err}", source.filename());
                None
            }
        })
        .collect();
    if raws.is_empty() {
        return Err(Error::NoData("no Halo profile files could be read".to_string()));
    }

    let raw = HaloHpl::merge(&select_wind_records(raws)?)
        .map_err(Error::RawParsing)?
        .sorted_by_time()
        .non_strictly_increasing_timesteps_removed()
        .nans_removed();
    if raw.ntime() < MIN_PROFILES_PER_SCAN {
        return Err(Error::NoData(
            "less than 4 profiles is not sufficient for a wind product".to_string(),
        ));
    }

    let azimuth = offset_azimuths(&raw.azimuth, options);
    let groups = group_scans_by_azimuth_rotation(&raw.time, &azimuth);
    let scans = retrieve_scans(
        &raw.time,
        &azimuth,
        &raw.elevation,
        &raw.radial_velocity,
        &groups,
    )?;

    let elevation = common_elevation(&scans)?;
    let height = raw
        .radial_distance
        .mapv(|range| range * elevation.to_radians().sin());
    build_wind(scans, height, raw.header.system_id.clone())
}

/// Build a wind product from WindCube VAD/DBS NetCDF sources.
pub fn wind_from_windcube(data: &[Source], options: &WindOptions) -> Result<Wind> {
    let raws: Vec<WindCubeVad> = data
        .iter()
        .filter_map(|source| match WindCubeVad::from_source(source) {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!("skipping {}: {err}", source.filename());
                None
            }
        })
        .collect();
    if raws.is_empty() {
        return Err(Error::NoData("no WindCube files could be read".to_string()));
    }

    let raw = WindCubeVad::merge(&raws)
        .map_err(Error::RawParsing)?
        .sorted_by_time()
        .non_strictly_increasing_timesteps_removed();
    let raw = select_vad_elevation(&raw)?.reindexed_scan_indices();
    if raw.ntime() < MIN_PROFILES_PER_SCAN {
        return Err(Error::NoData(
            "less than 4 profiles is not sufficient for a wind product".to_string(),
        ));
    }

    let azimuth = offset_azimuths(&raw.azimuth, options);
    let nscans = raw.scan_index.iter().copied().max().unwrap_or(-1) + 1;
    let groups: Vec<Vec<usize>> = (0..nscans)
        .map(|scan| {
            (0..raw.ntime())
                .filter(|&row| raw.scan_index[row] == scan)
                .collect()
        })
        .collect();
    let scans = retrieve_scans(
        &raw.time,
        &azimuth,
        &raw.elevation,
        &raw.radial_velocity,
        &groups,
    )?;

    common_elevation(&scans)?;
    build_wind(scans, raw.height.clone(), raw.system_id.clone())
}

/// Build a wind product from WLS70 sources. The instrument reports retrieved components
/// directly, so no least squares is run; the neighbour-difference mask still applies.
pub fn wind_from_wls70(data: &[Source], options: &WindOptions) -> Result<Wind> {
    let raws: Vec<Wls70> = data
        .iter()
        .filter_map(|source| match Wls70::from_source(source) {
            Ok(raw) => Some(raw),
            Err(err) => {
                warn!("skipping {}: {err}", source.filename());
                None
            }
        })
        .collect();
    if raws.is_empty() {
        return Err(Error::NoData("no WLS70 files could be read".to_string()));
    }

    let raw = Wls70::merge(&raws)
        .map_err(Error::RawParsing)?
        .sorted_by_time()
        .non_strictly_increasing_timesteps_removed();
    if raw.ntime() == 0 {
        return Err(Error::NoData("no WLS70 samples left after cleaning".to_string()));
    }

    let (zonal, meridional) = match options.azimuth_offset_deg {
        Some(offset) => rotate_components(&raw.zonal_wind, &raw.meridional_wind, offset),
        None => (raw.zonal_wind.clone(), raw.meridional_wind.clone()),
    };
    let mask = compute_mask(&zonal, &meridional, &raw.vertical_wind, None);

    Ok(Wind::new(
        raw.time.clone(),
        raw.altitude.clone(),
        zonal,
        meridional,
        raw.vertical_wind.clone(),
        mask,
        raw.system_id.clone(),
    )?)
}

/// One retrieved scan: its middle timestamp, common elevation and the per-gate solution.
struct ScanRetrieval {
    time: i64,
    elevation: f64,
    /// Wind components per gate, dim (range, 3): zonal, meridional, vertical.
    wind: Array2<f64>,
    /// Root-mean-square error of the radial-velocity fit per gate, dim (range,).
    rmse: Array1<f64>,
}

fn offset_azimuths(azimuth: &Array1<f64>, options: &WindOptions) -> Array1<f64> {
    match options.azimuth_offset_deg {
        Some(offset) => azimuth.mapv(|angle| angle + offset),
        None => azimuth.clone(),
    }
}

/// Rotate a horizontal component pair by the given angle in degrees.
fn rotate_components(
    zonal: &Array2<f64>,
    meridional: &Array2<f64>,
    offset_deg: f64,
) -> (Array2<f64>, Array2<f64>) {
    let (sin, cos) = offset_deg.to_radians().sin_cos();
    let rotated_zonal = Array2::from_shape_fn(zonal.dim(), |cell| {
        cos * zonal[cell] - sin * meridional[cell]
    });
    let rotated_meridional = Array2::from_shape_fn(zonal.dim(), |cell| {
        sin * zonal[cell] + cos * meridional[cell]
    });
    (rotated_zonal, rotated_meridional)
}

/// Group profiles into scans by walking them in time order: a new scan opens when the
/// rounded azimuth returns to the first azimuth of the current scan or after a 30 s gap.
///
/// When an azimuth is revisited mid-scan (possible with non-uniform patterns) the scan is
/// closed at the revisit; each azimuth is assumed to appear at most once per rotation.
pub(crate) fn group_scans_by_azimuth_rotation(time: &[i64], azimuth: &Array1<f64>) -> Vec<Vec<usize>> {
    let wrap = |angle: f64| (angle.round() as i64).rem_euclid(360);

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut first_azimuth = 0_i64;
    for row in 0..time.len() {
        let angle = wrap(azimuth[row]);
        if current.is_empty() {
            first_azimuth = angle;
            current.push(row);
            continue;
        }
        let gap = time[row] - time[row - 1];
        if angle == first_azimuth || gap > MAX_TIME_GAP_IN_SCAN_MICROS {
            groups.push(std::mem::take(&mut current));
            first_azimuth = angle;
        }
        current.push(row);
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}

/// Solve every sufficiently populated scan, in parallel over scans.
fn retrieve_scans(
    time: &[i64],
    azimuth: &Array1<f64>,
    elevation: &Array1<f64>,
    radial_velocity: &Array2<f64>,
    groups: &[Vec<usize>],
) -> Result<Vec<ScanRetrieval>> {
    let mut scans: Vec<ScanRetrieval> = groups
        .par_iter()
        .filter(|rows| rows.len() >= MIN_PROFILES_PER_SCAN)
        .map(|rows| retrieve_scan(time, azimuth, elevation, radial_velocity, rows))
        .collect::<Result<Vec<_>>>()?;

    if scans.is_empty() {
        return Err(Error::NoData(
            "no scan has enough profiles for a wind retrieval".to_string(),
        ));
    }

    // Scans are solved independently; enforce a strictly increasing product time axis.
    scans.sort_by_key(|scan| scan.time);
    let mut latest = None;
    scans.retain(|scan| {
        let keep = latest.map_or(true, |t| scan.time > t);
        if keep {
            latest = Some(scan.time);
        }
        keep
    });
    Ok(scans)
}

/// Solve `[u, v, w]` for one scan with the design matrix
/// `A[p, :] = [sin(az) cos(el), cos(az) cos(el), sin(el)]`, every gate independently.
fn retrieve_scan(
    time: &[i64],
    azimuth: &Array1<f64>,
    elevation: &Array1<f64>,
    radial_velocity: &Array2<f64>,
    rows: &[usize],
) -> Result<ScanRetrieval> {
    let nprofiles = rows.len();
    let ngates = radial_velocity.ncols();

    let rounded: Vec<f64> = rows.iter().map(|&row| elevation[row].round()).collect();
    if rounded.iter().any(|&angle| angle != rounded[0]) {
        return Err(Error::InvalidArgument(
            "elevations within a scan differ".to_string(),
        ));
    }

    let mut design = DMatrix::zeros(nprofiles, 3);
    for (p, &row) in rows.iter().enumerate() {
        let azimuth_rad = azimuth[row].to_radians();
        let elevation_rad = elevation[row].to_radians();
        design[(p, 0)] = azimuth_rad.sin() * elevation_rad.cos();
        design[(p, 1)] = azimuth_rad.cos() * elevation_rad.cos();
        design[(p, 2)] = elevation_rad.sin();
    }
    let velocities = DMatrix::from_fn(nprofiles, ngates, |p, gate| {
        radial_velocity[(rows[p], gate)]
    });

    let pseudo_inverse = design
        .clone()
        .pseudo_inverse(1e-10)
        .map_err(|message| Error::Numerical(format!("scan retrieval failed: {message}")))?;
    let solution = &pseudo_inverse * &velocities;
    let fitted = &design * &solution;

    let mut rmse = Array1::zeros(ngates);
    for gate in 0..ngates {
        let sum: f64 = (0..nprofiles)
            .map(|p| {
                let residual = fitted[(p, gate)] - velocities[(p, gate)];
                residual * residual
            })
            .sum();
        rmse[gate] = (sum / nprofiles as f64).sqrt();
    }

    Ok(ScanRetrieval {
        time: time[rows[nprofiles / 2]],
        elevation: rounded[0],
        wind: Array2::from_shape_fn((ngates, 3), |(gate, component)| {
            solution[(component, gate)]
        }),
        rmse,
    })
}

/// The common rounded elevation of all scans; differing elevations are a contract violation.
fn common_elevation(scans: &[ScanRetrieval]) -> Result<f64> {
    let first = scans
        .first()
        .ok_or_else(|| Error::NoData("no scans to take an elevation from".to_string()))?
        .elevation;
    if scans.iter().any(|scan| scan.elevation != first) {
        return Err(Error::InvalidArgument(
            "scan elevation is expected to stay the same over the day".to_string(),
        ));
    }
    Ok(first)
}

fn build_wind(scans: Vec<ScanRetrieval>, height: Array1<f64>, system_id: String) -> Result<Wind> {
    let nscans = scans.len();
    let ngates = height.len();
    let mut zonal = Array2::zeros((nscans, ngates));
    let mut meridional = Array2::zeros((nscans, ngates));
    let mut vertical = Array2::zeros((nscans, ngates));
    let mut rmse = Array2::zeros((nscans, ngates));
    let mut time = Vec::with_capacity(nscans);
    for (row, scan) in scans.iter().enumerate() {
        time.push(scan.time);
        for gate in 0..ngates {
            zonal[(row, gate)] = scan.wind[(gate, 0)];
            meridional[(row, gate)] = scan.wind[(gate, 1)];
            vertical[(row, gate)] = scan.wind[(gate, 2)];
            rmse[(row, gate)] = scan.rmse[gate];
        }
    }

    let mask = compute_mask(&zonal, &meridional, &vertical, Some(&rmse));
    Ok(Wind::new(
        time, height, zonal, meridional, vertical, mask, system_id,
    )?)
}

/// Mask cells with a poor radial fit or with a neighbour differing by more than 20 m/s in
/// any component along the range axis.
fn compute_mask(
    zonal: &Array2<f64>,
    meridional: &Array2<f64>,
    vertical: &Array2<f64>,
    rmse: Option<&Array2<f64>>,
) -> Array2<bool> {
    let (rows, cols) = zonal.dim();
    Array2::from_shape_fn((rows, cols), |(row, col)| {
        let neighbour_jump = [zonal, meridional, vertical].iter().any(|component| {
            let center = component[(row, col)];
            let mut difference = 0.0_f64;
            if col > 0 {
                difference = difference.max((component[(row, col - 1)] - center).abs());
            }
            if col + 1 < cols {
                difference = difference.max((component[(row, col + 1)] - center).abs());
            }
            difference > NEIGHBOUR_DIFFERENCE_THRESHOLD
        });
        let poor_fit = rmse.map_or(false, |rmse| rmse[(row, col)] > RMSE_THRESHOLD);
        poor_fit || neighbour_jump
    })
}
