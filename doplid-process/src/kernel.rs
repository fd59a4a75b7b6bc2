//!
//! Mask-aware rolling reductions over an ascending coordinate.
//!
//! All consumers share one window design: given an ascending 1-D coordinate `c` (time in
//! microseconds or range in meters), a 2-D array indexed first by `c` and a symmetric
//! half-window `h`, the window of index `k` covers the samples with
//! `c[k] - h <= c[i] < c[k] + h` (half-open on the upper side). The window edges are found
//! with a two-pointer sweep, so a full pass costs O(n) pointer movement regardless of the
//! window size; mean and variance are then read off prefix sums, the median recomputes its
//! window explicitly.
//!
//! Masked samples are excluded from every reduction. Cells whose window holds no valid sample
//! are NaN.
//!

use crate::result::{Error, Result};
use ndarray::{Array2, ArrayView2};

/// Result of a rolling-variance pass, including the effective window extent per cell.
#[derive(Debug, Clone)]
pub struct RollingVariance {
    /// Biased (population) variance over the valid window samples; NaN where the window holds
    /// no valid sample.
    pub variance: Array2<f64>,
    /// Coordinate of the first valid sample at or after the window start; NaN where no valid
    /// sample exists there.
    pub window_start: Array2<f64>,
    /// Coordinate of the last valid sample at or before the window stop; NaN where no valid
    /// sample exists there.
    pub window_stop: Array2<f64>,
    /// Number of valid samples in the window.
    pub nsamples: Array2<i64>,
}

fn check_input(
    coord: &[f64],
    shape: (usize, usize),
    mask: Option<&Array2<bool>>,
    half_window: f64,
) -> Result<()> {
    if !(half_window > 0.0) {
        return Err(Error::InvalidArgument(format!(
            "rolling half-window must be positive, got {half_window}"
        )));
    }
    if coord.len() != shape.0 {
        return Err(Error::Shape(format!(
            "coordinate length {} does not match array rows {}",
            coord.len(),
            shape.0
        )));
    }
    if coord.windows(2).any(|pair| pair[1] <= pair[0]) {
        return Err(Error::InvalidArgument(
            "rolling coordinate must be strictly ascending".to_string(),
        ));
    }
    if let Some(mask) = mask {
        if mask.dim() != shape {
            return Err(Error::Shape(format!(
                "mask shape {:?} does not match array shape {:?}",
                mask.dim(),
                shape
            )));
        }
    }
    Ok(())
}

/// Two-pointer sweep yielding the inclusive window `[lo, hi]` for every index.
fn sweep_windows(coord: &[f64], half_window: f64) -> Vec<(usize, usize)> {
    let n = coord.len();
    let mut windows = Vec::with_capacity(n);
    let mut i = 0;
    let mut j = 0;
    for k in 0..n {
        while i + 1 < n && coord[k] - coord[i + 1] >= half_window {
            i += 1;
        }
        while j + 1 < n && coord[j] - coord[k] < half_window {
            j += 1;
        }
        // The pointers can lag one sample outside the window on either edge.
        let lo = if coord[k] - coord[i] <= half_window { i } else { i + 1 };
        let hi = if coord[j] - coord[k] < half_window { j } else { j - 1 };
        windows.push((lo, hi));
    }
    windows
}

/// Per-column prefix sums of the masked values, their squares and the valid-sample counts.
struct PrefixSums {
    values: Array2<f64>,
    squares: Array2<f64>,
    counts: Array2<i64>,
    first_value: Array2<f64>,
    first_square: Array2<f64>,
    first_count: Array2<i64>,
}

impl PrefixSums {
    fn build(values: &ArrayView2<f64>, mask: Option<&Array2<bool>>) -> Self {
        let (rows, cols) = values.dim();
        let mut zeroed = Array2::zeros((rows, cols));
        let mut counts_row = Array2::zeros((rows, cols));
        for ((r, c), &value) in values.indexed_iter() {
            let masked = mask.map_or(false, |m| m[(r, c)]);
            if !masked {
                zeroed[(r, c)] = value;
                counts_row[(r, c)] = 1;
            }
        }
        let squares_row = &zeroed * &zeroed;

        let mut values_sum = zeroed.clone();
        let mut squares_sum = squares_row.clone();
        let mut counts_sum = counts_row.clone();
        for r in 1..rows {
            for c in 0..cols {
                values_sum[(r, c)] += values_sum[(r - 1, c)];
                squares_sum[(r, c)] += squares_sum[(r - 1, c)];
                counts_sum[(r, c)] += counts_sum[(r - 1, c)];
            }
        }
        Self {
            values: values_sum,
            squares: squares_sum,
            counts: counts_sum,
            first_value: zeroed,
            first_square: squares_row,
            first_count: counts_row,
        }
    }

    fn sum(&self, lo: usize, hi: usize, col: usize) -> f64 {
        self.values[(hi, col)] - self.values[(lo, col)] + self.first_value[(lo, col)]
    }

    fn sum_of_squares(&self, lo: usize, hi: usize, col: usize) -> f64 {
        self.squares[(hi, col)] - self.squares[(lo, col)] + self.first_square[(lo, col)]
    }

    fn count(&self, lo: usize, hi: usize, col: usize) -> i64 {
        self.counts[(hi, col)] - self.counts[(lo, col)] + self.first_count[(lo, col)]
    }
}

/// Rolling mean of `values` over the coordinate axis (axis 0), excluding masked samples.
pub fn rolling_mean(
    coord: &[f64],
    values: ArrayView2<f64>,
    mask: Option<&Array2<bool>>,
    half_window: f64,
) -> Result<Array2<f64>> {
    check_input(coord, values.dim(), mask, half_window)?;
    let (rows, cols) = values.dim();
    let sums = PrefixSums::build(&values, mask);
    let windows = sweep_windows(coord, half_window);

    let mut mean = Array2::from_elem((rows, cols), f64::NAN);
    for (k, &(lo, hi)) in windows.iter().enumerate() {
        for c in 0..cols {
            let n = sums.count(lo, hi, c);
            if n > 0 {
                mean[(k, c)] = sums.sum(lo, hi, c) / n as f64;
            }
        }
    }
    Ok(mean)
}

/// Rolling population variance of `values` over the coordinate axis (axis 0), excluding masked
/// samples, with the effective (valid-sample) window extent per cell.
///
/// The variance is read off prefix sums as `(Σx² - (Σx)²/N)/N`, which loses precision when the
/// values are large compared to their spread; the coordinate magnitudes used in this crate
/// (velocities in m/s) keep it well within the tolerances the products need.
pub fn rolling_variance(
    coord: &[f64],
    values: ArrayView2<f64>,
    mask: &Array2<bool>,
    half_window: f64,
) -> Result<RollingVariance> {
    check_input(coord, values.dim(), Some(mask), half_window)?;
    let (rows, cols) = values.dim();
    let sums = PrefixSums::build(&values, Some(mask));
    let windows = sweep_windows(coord, half_window);
    let next = next_valid(mask);
    let prev = prev_valid(mask);

    let mut variance = Array2::from_elem((rows, cols), f64::NAN);
    let mut window_start = Array2::from_elem((rows, cols), f64::NAN);
    let mut window_stop = Array2::from_elem((rows, cols), f64::NAN);
    let mut nsamples = Array2::zeros((rows, cols));

    for (k, &(lo, hi)) in windows.iter().enumerate() {
        for c in 0..cols {
            let n = sums.count(lo, hi, c);
            nsamples[(k, c)] = n;
            if n > 0 {
                let sum = sums.sum(lo, hi, c);
                let sum_sq = sums.sum_of_squares(lo, hi, c);
                variance[(k, c)] = (sum_sq - sum * sum / n as f64) / n as f64;
            }
            let start = next[(lo, c)];
            if start >= 0 && (start as usize) < rows {
                window_start[(k, c)] = coord[start as usize];
            }
            let stop = prev[(hi, c)];
            if stop >= 0 && (stop as usize) < rows {
                window_stop[(k, c)] = coord[stop as usize];
            }
        }
    }
    Ok(RollingVariance {
        variance,
        window_start,
        window_stop,
        nsamples,
    })
}

/// Rolling median of `values` over the coordinate axis (axis 0), excluding masked samples.
///
/// With `stride > 1` the median is evaluated on every stride-th index only and linearly
/// interpolated (extrapolated at the edges) back onto the full coordinate.
pub fn rolling_median(
    coord: &[f64],
    values: ArrayView2<f64>,
    mask: &Array2<bool>,
    half_window: f64,
    stride: usize,
) -> Result<Array2<f64>> {
    check_input(coord, values.dim(), Some(mask), half_window)?;
    if stride == 0 {
        return Err(Error::InvalidArgument(
            "rolling median stride must be at least 1".to_string(),
        ));
    }
    let (rows, cols) = values.dim();
    let windows = sweep_windows(coord, half_window);

    let sampled: Vec<usize> = (0..rows).step_by(stride).collect();
    let mut median = Array2::from_elem((rows, cols), f64::NAN);
    let mut window = Vec::new();
    for &k in &sampled {
        let (lo, hi) = windows[k];
        for c in 0..cols {
            window.clear();
            for r in lo..=hi {
                if !mask[(r, c)] && values[(r, c)].is_finite() {
                    window.push(values[(r, c)]);
                }
            }
            median[(k, c)] = median_of(&mut window);
        }
    }

    if stride == 1 || sampled.len() < 2 {
        return Ok(median);
    }

    // Interpolate the skipped rows from the sampled ones, extrapolating past the last sample.
    let mut filled = Array2::from_elem((rows, cols), f64::NAN);
    for k in 0..rows {
        let segment = match sampled.binary_search(&k) {
            Ok(_) => None,
            Err(position) => {
                let right = position.min(sampled.len() - 1).max(1);
                Some((sampled[right - 1], sampled[right]))
            }
        };
        for c in 0..cols {
            filled[(k, c)] = match segment {
                None => median[(k, c)],
                Some((left, right)) => {
                    let fraction = (coord[k] - coord[left]) / (coord[right] - coord[left]);
                    median[(left, c)] + fraction * (median[(right, c)] - median[(left, c)])
                }
            };
        }
    }
    Ok(filled)
}

fn median_of(window: &mut Vec<f64>) -> f64 {
    if window.is_empty() {
        return f64::NAN;
    }
    window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = window.len() / 2;
    if window.len() % 2 == 0 {
        (window[mid - 1] + window[mid]) / 2.0
    } else {
        window[mid]
    }
}

/// For every cell, the index of the first unmasked row at or after it in the same column, or
/// the row count if none exists.
pub fn next_valid(mask: &Array2<bool>) -> Array2<i64> {
    let (rows, cols) = mask.dim();
    let mut next = Array2::from_elem((rows, cols), rows as i64);
    for c in 0..cols {
        for r in (0..rows).rev() {
            if !mask[(r, c)] {
                next[(r, c)] = r as i64;
            } else if r + 1 < rows {
                next[(r, c)] = next[(r + 1, c)];
            }
        }
    }
    next
}

/// For every cell, the index of the last unmasked row at or before it in the same column, or
/// -1 if none exists.
pub fn prev_valid(mask: &Array2<bool>) -> Array2<i64> {
    let (rows, cols) = mask.dim();
    let mut prev = Array2::from_elem((rows, cols), -1_i64);
    for c in 0..cols {
        for r in 0..rows {
            if !mask[(r, c)] {
                prev[(r, c)] = r as i64;
            } else if r > 0 {
                prev[(r, c)] = prev[(r - 1, c)];
            }
        }
    }
    prev
}

/// Rolling median along the range axis: convenience wrapper transposing (time, range) input.
pub fn rolling_median_over_range(
    range: &[f64],
    values: &Array2<f64>,
    mask: &Array2<bool>,
    half_window: f64,
    stride: usize,
) -> Result<Array2<f64>> {
    let transposed = values.t().to_owned();
    let transposed_mask = mask.t().to_owned();
    let median = rolling_median(
        range,
        transposed.view(),
        &transposed_mask,
        half_window,
        stride,
    )?;
    Ok(median.reversed_axes().as_standard_layout().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2, Axis};

    fn no_mask(shape: (usize, usize)) -> Array2<bool> {
        Array2::from_elem(shape, false)
    }

    #[test]
    fn test_rolling_mean_on_irregular_coordinate() {
        let coord = [0.0, 1.0, 2.0, 5.0, 6.0, 10.0];
        let values = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let mean = rolling_mean(&coord, values.view(), None, 1.5).unwrap();
        // Window of c=5 is {5, 6}; window of c=10 is {10} alone.
        assert_abs_diff_eq!(mean[(3, 0)], 4.5);
        assert_abs_diff_eq!(mean[(5, 0)], 6.0);
    }

    #[test]
    fn test_rolling_mean_matches_naive_recompute() {
        let coord: Vec<f64> = (0..40).map(|i| i as f64 + (i % 3) as f64 * 0.1).collect();
        let values =
            Array2::from_shape_fn((40, 3), |(r, c)| ((r * 7 + c * 13) % 11) as f64 - 5.0);
        let half_window = 3.3;
        let mean = rolling_mean(&coord, values.view(), None, half_window).unwrap();
        for k in 0..coord.len() {
            for c in 0..3 {
                let window: Vec<f64> = (0..coord.len())
                    .filter(|&i| {
                        coord[k] - coord[i] <= half_window && coord[i] - coord[k] < half_window
                    })
                    .map(|i| values[(i, c)])
                    .collect();
                let naive = window.iter().sum::<f64>() / window.len() as f64;
                assert_abs_diff_eq!(mean[(k, c)], naive, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_masked_variance_with_effective_window() {
        let coord = [0.0, 1.0, 2.0, 3.0, 4.0];
        let values = array![[10.0], [100.0], [10.0], [100.0], [10.0]];
        let mask = array![[false], [true], [false], [true], [false]];
        let result = rolling_variance(&coord, values.view(), &mask, 2.5).unwrap();
        assert_abs_diff_eq!(result.variance[(2, 0)], 0.0);
        assert_eq!(result.nsamples[(2, 0)], 3);
        assert_abs_diff_eq!(result.window_start[(2, 0)], 0.0);
        assert_abs_diff_eq!(result.window_stop[(2, 0)], 4.0);
    }

    #[test]
    fn test_variance_is_nan_without_valid_samples() {
        let coord = [0.0, 1.0, 2.0];
        let values = array![[1.0], [2.0], [3.0]];
        let mask = array![[true], [true], [true]];
        let result = rolling_variance(&coord, values.view(), &mask, 1.0).unwrap();
        assert!(result.variance.iter().all(|v| v.is_nan()));
        assert!(result.window_start.iter().all(|v| v.is_nan()));
        assert!(result.nsamples.iter().all(|&n| n == 0));
    }

    #[test]
    fn test_growing_mask_never_grows_the_count() {
        let coord: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let values = Array2::from_shape_fn((20, 2), |(r, c)| (r + c) as f64);
        let sparse = Array2::from_shape_fn((20, 2), |(r, _)| r % 5 == 0);
        let dense = Array2::from_shape_fn((20, 2), |(r, _)| r % 5 == 0 || r % 3 == 0);
        let with_sparse = rolling_variance(&coord, values.view(), &sparse, 4.0).unwrap();
        let with_dense = rolling_variance(&coord, values.view(), &dense, 4.0).unwrap();
        for (a, b) in with_dense.nsamples.iter().zip(with_sparse.nsamples.iter()) {
            assert!(a <= b);
        }
    }

    #[test]
    fn test_rolling_median_skips_masked_samples() {
        let coord = [0.0, 1.0, 2.0, 3.0];
        let values = array![[1.0], [50.0], [3.0], [4.0]];
        let mask = array![[false], [true], [false], [false]];
        let median = rolling_median(&coord, values.view(), &mask, 1.5, 1).unwrap();
        assert_abs_diff_eq!(median[(1, 0)], 2.0);
    }

    #[test]
    fn test_strided_median_interpolates_between_samples() {
        let coord: Vec<f64> = (0..7).map(|i| i as f64).collect();
        let values = Array2::from_shape_fn((7, 1), |(r, _)| r as f64);
        let mask = no_mask((7, 1));
        let strided = rolling_median(&coord, values.view(), &mask, 0.6, 2).unwrap();
        // Sampled rows hold their own value (window is a single sample), odd rows interpolate.
        assert_abs_diff_eq!(strided[(2, 0)], 2.0);
        assert_abs_diff_eq!(strided[(3, 0)], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_next_and_prev_valid() {
        let mask = array![[true], [false], [true], [false], [true]];
        let next = next_valid(&mask);
        let prev = prev_valid(&mask);
        assert_eq!(next.index_axis(Axis(1), 0).to_vec(), vec![1, 1, 3, 3, 5]);
        assert_eq!(prev.index_axis(Axis(1), 0).to_vec(), vec![-1, 1, 1, 3, 3]);
    }

    #[test]
    fn test_non_ascending_coordinate_is_rejected() {
        let coord = [0.0, 2.0, 1.0];
        let values = Array2::zeros((3, 1));
        let result = rolling_mean(&coord, values.view(), None, 1.0);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
