//!
//! The noise engine: locating cells that hold only noise, removing the per-profile intensity
//! bias, the stare noise mask, and the shared post-hoc outlier mask built from a rolling
//! range median.
//!

use crate::filters::{gaussian_filter, median_filter_zero_padded, uniform_filter};
use crate::kernel;
use crate::result::Result;
use ndarray::{Array1, Array2};

const NEAR_RANGE_LIMIT: f64 = 90.0;

/// Thresholds of the noise-cell detector.
const INTENSITY_THRESHOLD: f64 = 1.008;
const MEDIAN_KERNEL_THRESHOLD: f64 = 1.002;
const GAUSSIAN_THRESHOLD: f64 = 0.02;

/// Thresholds of the stare noise mask.
const BOX_INTENSITY_THRESHOLD: f64 = 1.0025;
const BOX_VELOCITY_THRESHOLD: f64 = 2.0;
const LOW_INTENSITY_THRESHOLD: f64 = 1.0;

/// Find the cells that contain only noise: the complement of everything that looks like
/// signal directly, through a 5×5 median or through a Gaussian-smoothed union of both.
pub(crate) fn locate_noise(intensity: &Array2<f64>) -> Array2<bool> {
    let (rows, cols) = intensity.dim();
    let mut normalised = intensity.clone();
    for mut row in normalised.rows_mut() {
        let mut values: Vec<f64> = row.to_vec();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = values.len() / 2;
        let median = if values.is_empty() {
            f64::NAN
        } else if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) / 2.0
        } else {
            values[mid]
        };
        row.mapv_inplace(|value| value / median);
    }

    let median_filtered = median_filter_zero_padded(&normalised, 5);
    let mut union = Array2::zeros((rows, cols));
    let mut signal = Array2::from_elem((rows, cols), false);
    for index in 0..rows * cols {
        let cell = (index / cols, index % cols);
        let looks_like_signal = normalised[cell] > INTENSITY_THRESHOLD
            || median_filtered[cell] > MEDIAN_KERNEL_THRESHOLD;
        if looks_like_signal {
            union[cell] = 1.0;
            signal[cell] = true;
        }
    }

    let smoothed = gaussian_filter(&union, 8.0, 16);
    let mut noise = Array2::from_elem((rows, cols), false);
    for index in 0..rows * cols {
        let cell = (index / cols, index % cols);
        noise[cell] = !(signal[cell] || smoothed[cell] > GAUSSIAN_THRESHOLD);
    }
    noise
}

/// Remove the per-profile linear intensity bias.
///
/// A straight line `a·r + b` is fitted to each profile over its noise-only cells (gates in
/// the near-instrument band never count as noise) and the intensity is divided by the fit.
/// Profiles with fewer than two noise cells keep their intensity unchanged.
pub(crate) fn correct_intensity_noise_bias(
    intensity: &Array2<f64>,
    radial_distance: &Array1<f64>,
) -> Array2<f64> {
    let (rows, cols) = intensity.dim();
    let mut noise = locate_noise(intensity);
    for ((_, gate), cell) in noise.indexed_iter_mut() {
        if radial_distance[gate] <= NEAR_RANGE_LIMIT {
            *cell = false;
        }
    }

    let mut corrected = Array2::zeros((rows, cols));
    for row in 0..rows {
        let mut count = 0.0;
        let mut sum_r = 0.0;
        let mut sum_rr = 0.0;
        let mut sum_y = 0.0;
        let mut sum_ry = 0.0;
        for gate in 0..cols {
            if noise[(row, gate)] {
                let r = radial_distance[gate];
                let y = intensity[(row, gate)];
                count += 1.0;
                sum_r += r;
                sum_rr += r * r;
                sum_y += y;
                sum_ry += r * y;
            }
        }

        let determinant = count * sum_rr - sum_r * sum_r;
        let fit = if count >= 2.0 && determinant.abs() > f64::EPSILON {
            let a = (count * sum_ry - sum_r * sum_y) / determinant;
            let b = (sum_rr * sum_y - sum_r * sum_ry) / determinant;
            Some((a, b))
        } else {
            None
        };

        for gate in 0..cols {
            corrected[(row, gate)] = match fit {
                Some((a, b)) => intensity[(row, gate)] / (a * radial_distance[gate] + b),
                None => intensity[(row, gate)],
            };
        }
    }
    corrected
}

/// The stare noise mask: cells where a 21×3 box mean shows noise-level intensity together
/// with implausible velocities, plus the near-instrument band and low-intensity cells.
pub(crate) fn compute_noise_mask(
    intensity: &Array2<f64>,
    radial_velocity: &Array2<f64>,
    radial_distance: &Array1<f64>,
) -> Array2<bool> {
    let intensity_box = uniform_filter(intensity, (21, 3));
    let velocity_box = uniform_filter(&radial_velocity.mapv(f64::abs), (21, 3));

    Array2::from_shape_fn(intensity.dim(), |cell| {
        let box_noise = intensity_box[cell] < BOX_INTENSITY_THRESHOLD
            && velocity_box[cell] > BOX_VELOCITY_THRESHOLD;
        let near_instrument = radial_distance[cell.1] < NEAR_RANGE_LIMIT;
        let low_intensity = intensity[cell] < LOW_INTENSITY_THRESHOLD;
        box_noise || near_instrument || low_intensity
    })
}

/// Post-hoc outlier mask: mask cells that deviate from the rolling range median by more than
/// the threshold, then clear isolated survivors (a cell survives only if at least one of its
/// range neighbours also survives).
pub(crate) fn masked_outliers(
    values: &Array2<f64>,
    radial_distance: &[f64],
    mask: &Array2<bool>,
    window: f64,
    stride: usize,
    threshold: f64,
) -> Result<Array2<bool>> {
    let median =
        kernel::rolling_median_over_range(radial_distance, values, mask, window / 2.0, stride)?;
    let mut new_mask = Array2::from_shape_fn(mask.dim(), |cell| {
        mask[cell] || (values[cell] - median[cell]).abs() > threshold
    });
    new_mask = remove_isolated_survivors(&new_mask);
    Ok(new_mask)
}

/// Mask any unmasked cell whose two range neighbours are both masked.
pub(crate) fn remove_isolated_survivors(mask: &Array2<bool>) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    if cols < 3 {
        return mask.clone();
    }
    let mut cleaned = Array2::from_elem((rows, cols), true);
    for row in 0..rows {
        for col in 0..cols {
            if mask[(row, col)] {
                continue;
            }
            let keep = if col == 0 {
                !mask[(row, 1)]
            } else if col == cols - 1 {
                !mask[(row, cols - 2)]
            } else {
                !mask[(row, col - 1)] || !mask[(row, col + 1)]
            };
            cleaned[(row, col)] = !keep;
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_noise_mask_covers_near_band_and_low_intensity() {
        let radial_distance = array![15.0, 45.0, 105.0, 135.0];
        let intensity = array![
            [1.01, 1.01, 1.01, 0.95],
            [1.01, 1.01, 1.01, 1.01],
        ];
        let velocity = Array2::zeros((2, 4));
        let mask = compute_noise_mask(&intensity, &velocity, &radial_distance);
        assert!(mask[(0, 0)] && mask[(0, 1)]);
        assert!(mask[(0, 3)]);
        assert!(!mask[(1, 2)]);
    }

    #[test]
    fn test_noise_mask_requires_both_box_conditions() {
        let radial_distance = array![105.0, 135.0, 165.0];
        // Noise-level intensity but calm velocities: the box condition must not fire.
        let intensity = Array2::from_elem((30, 3), 1.001);
        let calm = Array2::zeros((30, 3));
        let mask = compute_noise_mask(&intensity, &calm, &radial_distance);
        assert!(!mask[(15, 1)]);

        let wild = Array2::from_elem((30, 3), 5.0);
        let mask = compute_noise_mask(&intensity, &wild, &radial_distance);
        assert!(mask[(15, 1)]);
    }

    #[test]
    fn test_bias_correction_flattens_a_tilted_noise_floor() {
        let ngates = 60;
        let radial_distance =
            Array1::from_iter((0..ngates).map(|gate| (gate as f64 + 0.5) * 30.0));
        // Pure noise with a linear tilt; the fit should take it back out.
        let intensity = Array2::from_shape_fn((4, ngates), |(_, gate)| {
            1.0 + 1e-4 * radial_distance[gate]
        });
        let corrected = correct_intensity_noise_bias(&intensity, &radial_distance);
        for row in 0..4 {
            for gate in 0..ngates {
                if radial_distance[gate] > NEAR_RANGE_LIMIT {
                    assert_abs_diff_eq!(corrected[(row, gate)], 1.0, epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_isolated_survivors_are_cleared() {
        let mask = array![
            [true, false, true, false, false],
            [false, false, true, true, true],
        ];
        let cleaned = remove_isolated_survivors(&mask);
        // The lone survivor at (0, 1) dies, the pair at (0, 3..4) lives.
        assert!(cleaned[(0, 1)]);
        assert!(!cleaned[(0, 3)]);
        assert!(!cleaned[(0, 4)]);
        // Edge cells survive with a single unmasked neighbour.
        assert!(!cleaned[(1, 0)]);
        assert!(!cleaned[(1, 1)]);
    }

    #[test]
    fn test_outlier_mask_flags_spikes_against_the_rolling_median() {
        let ngates = 20;
        let radial_distance: Vec<f64> = (0..ngates).map(|g| (g as f64 + 0.5) * 30.0).collect();
        let mut values = Array2::from_elem((2, ngates), 0.5);
        values[(0, 10)] = 9.0;
        let mask = Array2::from_elem((2, ngates), false);
        let outliers = masked_outliers(
            &values,
            &radial_distance,
            &mask,
            150.0,
            1,
            2.0,
        )
        .unwrap();
        assert!(outliers[(0, 10)]);
        assert!(!outliers[(0, 5)]);
        assert!(!outliers[(1, 10)]);
    }
}
