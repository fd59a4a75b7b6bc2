//!
//! Background correction for Halo stares.
//!
//! The measured per-gate background signal is noisy and shows up as vertical stripes in
//! intensity plots. The correction replaces each background profile with a smooth fit of a
//! chosen shape (linear, exponential or their sum) and rescales the intensity by
//! `signal_original / signal_fit`. Profiles are first clustered into at most two regimes by
//! their near-range median, and each cluster is fitted separately; the fit shape can be
//! inferred from the residuals of all three shapes.
//!

use crate::cluster::two_means;
use crate::optimize::nelder_mead;
use crate::result::{Error, Result};
use doplid_decode::halo::{HaloBg, HaloHpl};
use log::debug;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};

/// How the background signal is conditioned before computing backscatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BgCorrectionMethod {
    /// Replace each background profile with a fitted shape.
    Fit,
    /// Replace each background profile with a mean profile. Not implemented.
    Mean,
    /// Use an externally supplied background. Not implemented.
    PreComputed,
}

/// The shape fitted to the background signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BgFitMethod {
    Lin,
    Exp,
    ExpLin,
}

/// A fitted background shape with its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BgFit {
    Lin { a: f64, b: f64 },
    Exp { a: f64, b: f64, c: f64 },
    ExpLin { a: f64, b: f64, c: f64, d: f64, e: f64 },
}

impl BgFit {
    /// Evaluate the fitted shape at the given range.
    pub fn evaluate(&self, range: f64) -> f64 {
        match *self {
            BgFit::Lin { a, b } => a * range + b,
            BgFit::Exp { a, b, c } => a * (b * range.powf(c)).exp(),
            BgFit::ExpLin { a, b, c, d, e } => {
                a * (b * range.powf(c)).exp() + d * range + e
            }
        }
    }
}

const NEAR_RANGE_LIMIT: f64 = 90.0;
const CLUSTER_BAND_UPPER: f64 = 1500.0;
const INFERENCE_RANGE_UPPER: f64 = 8000.0;
const ITERATIONS_PER_PARAM: usize = 600;

fn searchsorted_right(haystack: &[i64], needle: i64) -> usize {
    haystack.partition_point(|&value| value <= needle)
}

/// Restrict a background record to the profiles some stare profile actually binds to.
pub(crate) fn select_relevant_background_profiles(bg: &HaloBg, time: &[i64]) -> HaloBg {
    let mut relevant = vec![false; bg.ntime()];
    for &t in time {
        let index = searchsorted_right(&bg.time, t);
        if index > 0 {
            relevant[index - 1] = true;
        }
    }
    let rows: Vec<usize> = relevant
        .iter()
        .enumerate()
        .filter_map(|(row, &keep)| keep.then_some(row))
        .collect();
    bg.select(&rows)
}

/// Bind each stare profile to its latest-preceding background profile and rescale the
/// intensity by the original/fitted background ratio. Profiles with no preceding background
/// measurement are dropped.
pub(crate) fn correct_background(
    raw: HaloHpl,
    bg: &HaloBg,
    method: BgCorrectionMethod,
) -> Result<(HaloHpl, Array2<f64>)> {
    let relevant = select_relevant_background_profiles(bg, &raw.time);
    if relevant.ntime() == 0 {
        return Err(Error::NoData(
            "no background profiles precede the stare profiles".to_string(),
        ));
    }

    let corrected = match method {
        BgCorrectionMethod::Fit => {
            correct_background_by_fitting(&relevant, &raw.radial_distance, None)?
        }
        BgCorrectionMethod::Mean | BgCorrectionMethod::PreComputed => {
            return Err(Error::InvalidArgument(format!(
                "background correction method {method:?} is not implemented"
            )))
        }
    };

    let mut keep_rows = Vec::with_capacity(raw.ntime());
    let mut bg_rows = Vec::with_capacity(raw.ntime());
    for (row, &t) in raw.time.iter().enumerate() {
        let index = searchsorted_right(&relevant.time, t);
        if index > 0 {
            keep_rows.push(row);
            bg_rows.push(index - 1);
        }
    }
    let raw_with_bg = raw.select(&keep_rows);

    let ngates = raw_with_bg.ngates();
    let mut intensity = Array2::zeros((keep_rows.len(), ngates));
    for (out_row, &bg_row) in bg_rows.iter().enumerate() {
        for gate in 0..ngates {
            intensity[(out_row, gate)] = raw_with_bg.intensity[(out_row, gate)]
                * relevant.signal[(bg_row, gate)]
                / corrected[(bg_row, gate)];
        }
    }
    Ok((raw_with_bg, intensity))
}

/// Fit each background-profile cluster with the chosen (or inferred) shape and return the
/// smooth replacement signal.
pub(crate) fn correct_background_by_fitting(
    bg: &HaloBg,
    radial_distance: &Array1<f64>,
    method: Option<BgFitMethod>,
) -> Result<Array2<f64>> {
    if bg.ngates() != radial_distance.len() {
        return Err(Error::Shape(format!(
            "background has {} gates but the range grid has {}",
            bg.ngates(),
            radial_distance.len()
        )));
    }

    let clusters = cluster_background_profiles(&bg.signal, radial_distance);
    let nclusters = clusters.iter().copied().max().unwrap_or(0) + 1;

    let mut corrected = Array2::zeros(bg.signal.dim());
    for cluster in 0..nclusters {
        let rows: Vec<usize> = clusters
            .iter()
            .enumerate()
            .filter_map(|(row, &label)| (label == cluster).then_some(row))
            .collect();
        if rows.is_empty() {
            continue;
        }
        let signal = bg.select(&rows).signal;
        let fitted = fit_background(&signal, radial_distance, method)?;
        for (sub_row, &row) in rows.iter().enumerate() {
            for gate in 0..corrected.ncols() {
                corrected[(row, gate)] = fitted[(sub_row, gate)];
            }
        }
    }

    if corrected.iter().any(|value| !value.is_finite()) {
        return Err(Error::Numerical(
            "background fit produced non-finite values".to_string(),
        ));
    }
    Ok(corrected)
}

/// Fit one cluster of background profiles, inferring the shape when none is given.
fn fit_background(
    signal: &Array2<f64>,
    radial_distance: &Array1<f64>,
    method: Option<BgFitMethod>,
) -> Result<Array2<f64>> {
    let method = match method {
        Some(method) => method,
        None => infer_fit_type(signal, radial_distance),
    };

    let scale = row_medians(signal);
    let peaks = detect_peaks(signal);
    let mut gates: Vec<usize> = (0..radial_distance.len())
        .filter(|&gate| radial_distance[gate] > NEAR_RANGE_LIMIT && !peaks[gate])
        .collect();
    if gates.is_empty() {
        // Nothing beyond the near-instrument band: fit whatever is there instead of failing.
        debug!("background fit has no gates beyond {NEAR_RANGE_LIMIT} m, using all gates");
        gates = (0..radial_distance.len()).collect();
    }

    let fit = match method {
        BgFitMethod::Lin => linear_fit(signal, &scale, radial_distance, &gates)?,
        BgFitMethod::Exp => {
            let rss = scaled_rss(signal, &scale, radial_distance, &gates, exp_shape);
            let params = nelder_mead(rss, &[1.0, -1.0, -1.0], 3 * ITERATIONS_PER_PARAM);
            BgFit::Exp {
                a: params[0],
                b: params[1],
                c: params[2],
            }
        }
        BgFitMethod::ExpLin => {
            let rss = scaled_rss(signal, &scale, radial_distance, &gates, explin_shape);
            let params = nelder_mead(rss, &[1.0, -1.0, -1.0, 0.0, 0.0], 5 * ITERATIONS_PER_PARAM);
            BgFit::ExpLin {
                a: params[0],
                b: params[1],
                c: params[2],
                d: params[3],
                e: params[4],
            }
        }
    };

    let mut fitted = Array2::zeros(signal.dim());
    for row in 0..signal.nrows() {
        for gate in 0..signal.ncols() {
            fitted[(row, gate)] = fit.evaluate(radial_distance[gate]) * scale[row];
        }
    }
    Ok(fitted)
}

fn lin_shape(params: &[f64], range: f64) -> f64 {
    params[0] * range + params[1]
}

fn exp_shape(params: &[f64], range: f64) -> f64 {
    params[0] * (params[1] * range.powf(params[2])).exp()
}

fn explin_shape(params: &[f64], range: f64) -> f64 {
    exp_shape(&params[..3], range) + lin_shape(&params[3..], range)
}

/// Residual sum of squares of a shape against the per-profile scaled signal over the given
/// gates.
fn scaled_rss<'a>(
    signal: &'a Array2<f64>,
    scale: &'a [f64],
    radial_distance: &'a Array1<f64>,
    gates: &'a [usize],
    shape: fn(&[f64], f64) -> f64,
) -> impl Fn(&[f64]) -> f64 + 'a {
    move |params: &[f64]| {
        let mut rss = 0.0;
        for row in 0..signal.nrows() {
            for &gate in gates {
                let scaled = signal[(row, gate)] / scale[row];
                let residual = scaled - shape(params, radial_distance[gate]);
                rss += residual * residual;
            }
        }
        rss
    }
}

/// Infer the fit shape from the residuals of all three shapes over the inference band.
///
/// EXPLIN wins when an exponential component helps (their best beats the linear fit by 5%)
/// and the linear tail adds something on top of the pure exponential; EXP when only the
/// former holds; LIN otherwise.
fn infer_fit_type(signal: &Array2<f64>, radial_distance: &Array1<f64>) -> BgFitMethod {
    let peaks = detect_peaks(signal);
    let gates: Vec<usize> = (0..radial_distance.len())
        .filter(|&gate| {
            radial_distance[gate] > NEAR_RANGE_LIMIT
                && radial_distance[gate] < INFERENCE_RANGE_UPPER
                && !peaks[gate]
        })
        .collect();
    if gates.is_empty() {
        return BgFitMethod::Lin;
    }
    let scale = row_medians(signal);

    let lin_rss_fn = scaled_rss(signal, &scale, radial_distance, &gates, lin_shape);
    let exp_rss_fn = scaled_rss(signal, &scale, radial_distance, &gates, exp_shape);
    let explin_rss_fn = scaled_rss(signal, &scale, radial_distance, &gates, explin_shape);

    let lin_best = nelder_mead(&lin_rss_fn, &[1e-5, 1.0], 2 * ITERATIONS_PER_PARAM);
    let exp_best = nelder_mead(&exp_rss_fn, &[1.0, -1.0, -1.0], 3 * ITERATIONS_PER_PARAM);
    let explin_best = nelder_mead(
        &explin_rss_fn,
        &[1.0, -1.0, -1.0, 0.0, 0.0],
        5 * ITERATIONS_PER_PARAM,
    );

    let lin_rss = lin_rss_fn(&lin_best);
    let exp_rss = exp_rss_fn(&exp_best);
    let explin_rss = explin_rss_fn(&explin_best);

    if exp_rss.min(explin_rss) / lin_rss < 0.95 {
        if (exp_rss - explin_rss) / lin_rss > 0.05 {
            BgFitMethod::ExpLin
        } else {
            BgFitMethod::Exp
        }
    } else {
        BgFitMethod::Lin
    }
}

/// One linear shape for all profiles of a cluster, solved by least squares on the stacked
/// scaled signal.
fn linear_fit(
    signal: &Array2<f64>,
    scale: &[f64],
    radial_distance: &Array1<f64>,
    gates: &[usize],
) -> Result<BgFit> {
    let nrows = signal.nrows() * gates.len();
    let mut design = DMatrix::zeros(nrows, 2);
    let mut observed = DVector::zeros(nrows);
    for row in 0..signal.nrows() {
        for (position, &gate) in gates.iter().enumerate() {
            let index = row * gates.len() + position;
            design[(index, 0)] = radial_distance[gate];
            design[(index, 1)] = 1.0;
            observed[index] = signal[(row, gate)] / scale[row];
        }
    }
    let solution = design
        .svd(true, true)
        .solve(&observed, 1e-12)
        .map_err(|message| Error::Numerical(format!("linear background fit failed: {message}")))?;
    Ok(BgFit::Lin {
        a: solution[0],
        b: solution[1],
    })
}

/// Median of each row.
fn row_medians(signal: &Array2<f64>) -> Vec<f64> {
    (0..signal.nrows())
        .map(|row| {
            let mut values: Vec<f64> = signal.row(row).to_vec();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = values.len() / 2;
            if values.is_empty() {
                f64::NAN
            } else if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            }
        })
        .collect()
}

/// Locate peaks in the profile-mean scaled signal: gates whose second difference dips below
/// -0.01, extended to their immediate neighbours. Peaked gates are excluded from the fits.
fn detect_peaks(signal: &Array2<f64>) -> Vec<bool> {
    let ngates = signal.ncols();
    let scale = row_medians(signal);
    let mut mean = vec![0.0; ngates];
    for row in 0..signal.nrows() {
        for gate in 0..ngates {
            mean[gate] += signal[(row, gate)] / scale[row];
        }
    }
    for value in &mut mean {
        *value /= signal.nrows() as f64;
    }

    let mut peaks = vec![false; ngates];
    for gate in 1..ngates.saturating_sub(1) {
        let second_difference = mean[gate + 1] - 2.0 * mean[gate] + mean[gate - 1];
        if second_difference < -0.01 {
            peaks[gate] = true;
        }
    }
    set_adjacent_true(&peaks)
}

fn set_adjacent_true(flags: &[bool]) -> Vec<bool> {
    let n = flags.len();
    let mut extended = flags.to_vec();
    for index in 0..n {
        if flags[index] {
            if index > 0 {
                extended[index - 1] = true;
            }
            if index + 1 < n {
                extended[index + 1] = true;
            }
        }
    }
    extended
}

/// Cluster background profiles into at most two regimes by their median scaled signal over
/// the near-range band. The split is only accepted when the clusters are clearly separated
/// relative to their widths.
fn cluster_background_profiles(
    signal: &Array2<f64>,
    radial_distance: &Array1<f64>,
) -> Vec<usize> {
    let nprofiles = signal.nrows();
    if nprofiles < 2 {
        return vec![0; nprofiles];
    }
    let band: Vec<usize> = (0..radial_distance.len())
        .filter(|&gate| {
            radial_distance[gate] > NEAR_RANGE_LIMIT && radial_distance[gate] < CLUSTER_BAND_UPPER
        })
        .collect();
    if band.is_empty() {
        return vec![0; nprofiles];
    }

    let scale = row_medians(signal);
    let profile_medians: Vec<f64> = (0..nprofiles)
        .map(|row| {
            let mut values: Vec<f64> = band
                .iter()
                .map(|&gate| signal[(row, gate)] / scale[row])
                .collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            }
        })
        .collect();

    let clustering = two_means(&profile_medians);
    let mut widths = [0.0_f64; 2];
    for cluster in 0..2 {
        let members: Vec<f64> = profile_medians
            .iter()
            .zip(clustering.labels.iter())
            .filter(|(_, &label)| label == cluster)
            .map(|(&value, _)| value)
            .collect();
        if members.is_empty() {
            return vec![0; nprofiles];
        }
        let max = members.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = members.iter().copied().fold(f64::INFINITY, f64::min);
        widths[cluster] = max - min;
    }
    let max_width = widths[0].max(widths[1]);
    let distance = (clustering.centers[0] - clustering.centers[1]).abs();
    if max_width.abs() < 1e-12 {
        return vec![0; nprofiles];
    }
    if distance / max_width > 3.0 {
        clustering.labels
    } else {
        vec![0; nprofiles]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn grid(ngates: usize, spacing: f64) -> Array1<f64> {
        Array1::from_iter((0..ngates).map(|gate| (gate as f64 + 0.5) * spacing))
    }

    #[test]
    fn test_linear_background_is_recovered() {
        let radial_distance = grid(40, 30.0);
        let signal = Array2::from_shape_fn((3, 40), |(_, gate)| {
            1.0 + 2e-5 * radial_distance[gate]
        });
        let bg = HaloBg {
            time: vec![0, 1_000_000, 2_000_000],
            signal: signal.clone(),
        };
        let corrected =
            correct_background_by_fitting(&bg, &radial_distance, Some(BgFitMethod::Lin)).unwrap();
        for gate in 0..40 {
            // The fitted profile reproduces the linear signal well beyond the near band.
            assert_abs_diff_eq!(corrected[(0, gate)], signal[(0, gate)], epsilon = 1e-3);
        }
    }

    #[test]
    fn test_relevant_profiles_are_latest_preceding() {
        let bg = HaloBg {
            time: vec![0, 10, 20, 30],
            signal: Array2::ones((4, 2)),
        };
        let relevant = select_relevant_background_profiles(&bg, &[15, 17, 25]);
        assert_eq!(relevant.time, vec![10, 20]);
    }

    #[test]
    fn test_profiles_without_preceding_background_are_dropped() {
        let bg = HaloBg {
            time: vec![0, 10, 20, 30],
            signal: Array2::ones((4, 2)),
        };
        let relevant = select_relevant_background_profiles(&bg, &[-5]);
        assert_eq!(relevant.ntime(), 0);
    }

    #[test]
    fn test_cluster_split_needs_clear_separation() {
        let radial_distance = grid(50, 30.0);
        // Two regimes: flat profiles and profiles raised over the lower half of the band.
        let signal = Array2::from_shape_fn((6, 50), |(row, gate)| {
            let base = 1000.0;
            let raised = if row < 3 { 0.0 } else { 300.0 + row as f64 };
            let in_lower_band = radial_distance[gate] > 90.0 && radial_distance[gate] < 800.0;
            if in_lower_band {
                base + raised
            } else {
                base
            }
        });
        let labels = cluster_background_profiles(&signal, &radial_distance);
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[3], labels[4]);
        assert_ne!(labels[0], labels[3]);

        let flat = Array2::from_elem((6, 50), 1000.0);
        let labels = cluster_background_profiles(&flat, &radial_distance);
        assert!(labels.iter().all(|&label| label == 0));
    }

    #[test]
    fn test_peaks_are_detected_and_extended() {
        let mut signal = Array2::from_elem((2, 30), 1.0);
        signal[(0, 10)] = 2.0;
        signal[(1, 10)] = 2.0;
        let peaks = detect_peaks(&signal);
        assert!(peaks[9] && peaks[10] && peaks[11]);
        assert!(!peaks[7] && !peaks[13]);
    }

    #[test]
    fn test_mean_method_is_not_implemented() {
        let bg = HaloBg {
            time: vec![0],
            signal: Array2::ones((1, 3)),
        };
        let raw = minimal_raw();
        let result = correct_background(raw, &bg, BgCorrectionMethod::Mean);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    fn minimal_raw() -> HaloHpl {
        use doplid_decode::halo::HaloHplHeader;
        HaloHpl {
            header: HaloHplHeader {
                filename: "Stare_213.hpl".to_string(),
                gate_points: 10,
                nrays: Some(1),
                nwaypoints: None,
                ngates: 3,
                pulses_per_ray: 10000,
                range_gate_length: 30.0,
                resolution: 0.038,
                scan_type: "Stare".to_string(),
                focus_range: 65535,
                start_time: 1_000_000,
                system_id: "213".to_string(),
                instrument_spectral_width: None,
            },
            time: vec![1_000_000, 2_000_000],
            radial_distance: grid(3, 30.0),
            azimuth: Array1::zeros(2),
            elevation: Array1::from_elem(2, 90.0),
            pitch: None,
            roll: None,
            radial_velocity: Array2::zeros((2, 3)),
            intensity: Array2::ones((2, 3)),
            beta: Array2::ones((2, 3)),
            spectral_width: None,
        }
    }

    #[test]
    fn test_peak_detection_flags_nothing_on_smooth_profiles() {
        let radial_distance = grid(40, 30.0);
        let signal = Array2::from_shape_fn((2, 40), |(_, gate)| {
            1000.0 + 0.01 * radial_distance[gate]
        });
        let peaks = detect_peaks(&signal);
        assert!(peaks.iter().all(|&flag| !flag));
    }
}
