//!
//! The turbulence product: the turbulent-kinetic-energy dissipation rate ε from the rolling
//! variance of the vertical velocity and the horizontal wind speed, via the Kolmogorov
//! inertial-subrange relation between the variance and the length scales sampled by the
//! measurement.
//!

use crate::interpolate::GridInterpolator;
use crate::kernel;
use crate::noise::masked_outliers;
use crate::result::{Error, Result};
use doplid_model::data::{Stare, Turbulence, Wind};
use ndarray::{Array1, Array2};

const KOLMOGOROV_CONSTANT: f64 = 0.55;
const OUTLIER_WINDOW_METERS: f64 = 150.0;
const OUTLIER_THRESHOLD: f64 = 2.0;

/// Pulse budget behind the default ray accumulation time: 10 000 pulses per ray at a
/// 15 kHz pulse repetition rate.
const DEFAULT_PULSES_PER_RAY: f64 = 10_000.0;
const DEFAULT_PULSE_REPETITION_RATE: f64 = 15e3;

/// Options for the dissipation-rate calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurbulenceOptions {
    /// Length of the variance window in seconds.
    pub period: f64,
    /// Ray accumulation (integration) time in seconds.
    pub ray_accumulation_time: f64,
    /// Full beam divergence in radians.
    pub beam_divergence: f64,
}

impl Default for TurbulenceOptions {
    fn default() -> Self {
        Self {
            period: 600.0,
            ray_accumulation_time: DEFAULT_PULSES_PER_RAY / DEFAULT_PULSE_REPETITION_RATE,
            beam_divergence: 33e-6,
        }
    }
}

/// Vertical-velocity time series on a (time, height) grid.
#[derive(Debug, Clone, PartialEq)]
pub struct VerticalWind {
    pub time: Vec<i64>,
    pub height: Array1<f64>,
    /// Vertical wind speed in m/s, dim (time, height).
    pub w: Array2<f64>,
    /// `true` marks cells that must not enter the variance.
    pub mask: Array2<bool>,
}

/// Horizontal wind speed on a (time, height) grid. Must be free of NaN cells.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizontalWind {
    pub time: Vec<i64>,
    pub height: Array1<f64>,
    /// Horizontal wind speed in m/s, dim (time, height).
    pub speed: Array2<f64>,
}

impl VerticalWind {
    /// Take the vertical velocity of a near-vertical stare, tightening its mask with the
    /// rolling-median outlier filter first.
    pub fn from_stare(stare: &Stare) -> Result<Self> {
        let median_elevation = median(stare.elevation().iter().copied())
            .ok_or_else(|| Error::NoData("stare has no profiles".to_string()))?;
        if (median_elevation - 90.0).abs() > 5.0 {
            return Err(Error::InvalidArgument(format!(
                "stare elevation {median_elevation:.1} degrees is not near-vertical"
            )));
        }

        let radial_distance: Vec<f64> = stare.radial_distance().to_vec();
        let mask = masked_outliers(
            stare.radial_velocity(),
            &radial_distance,
            stare.mask(),
            OUTLIER_WINDOW_METERS,
            1,
            OUTLIER_THRESHOLD,
        )?;
        Ok(Self {
            time: stare.time().to_vec(),
            height: stare.radial_distance().clone(),
            w: stare.radial_velocity().clone(),
            mask,
        })
    }
}

impl HorizontalWind {
    /// Take the horizontal wind speed of a wind product. NaN cells violate the turbulence
    /// contract and are rejected.
    pub fn from_wind(wind: &Wind) -> Result<Self> {
        let speed = wind.horizontal_wind_speed();
        if speed.iter().any(|value| !value.is_finite()) {
            return Err(Error::InvalidArgument(
                "horizontal wind speed must not contain NaNs".to_string(),
            ));
        }
        Ok(Self {
            time: wind.time().to_vec(),
            height: wind.height().clone(),
            speed,
        })
    }
}

/// Convenience constructor going straight from the stare and wind products.
pub fn turbulence_from_products(
    stare: &Stare,
    wind: &Wind,
    options: &TurbulenceOptions,
) -> Result<Turbulence> {
    let vertical = VerticalWind::from_stare(stare)?;
    let horizontal = HorizontalWind::from_wind(wind)?;
    turbulence(&vertical, &horizontal, options)
}

/// Compute the dissipation rate from a vertical-velocity series and a horizontal wind.
pub fn turbulence(
    vert: &VerticalWind,
    hori: &HorizontalWind,
    options: &TurbulenceOptions,
) -> Result<Turbulence> {
    if vert.time.is_empty() || vert.height.is_empty() {
        return Err(Error::NoData("vertical wind grid is empty".to_string()));
    }
    if vert.w.dim() != (vert.time.len(), vert.height.len()) {
        return Err(Error::Shape(format!(
            "vertical wind has shape {:?}, expected {:?}",
            vert.w.dim(),
            (vert.time.len(), vert.height.len())
        )));
    }

    let speed = preprocess_horizontal_wind(vert, hori, options)?;

    let coord: Vec<f64> = vert.time.iter().map(|&t| t as f64).collect();
    let half_window = options.period / 2.0 * 1e6;
    let variance = kernel::rolling_variance(&coord, vert.w.view(), &vert.mask, half_window)?;

    let shape = vert.w.dim();
    let sin_half_divergence = (options.beam_divergence / 2.0).sin();
    let mut dissipation_rate = Array2::from_elem(shape, f64::NAN);
    for ((row, gate), epsilon) in dissipation_rate.indexed_iter_mut() {
        let sampling_time = (variance.window_stop[(row, gate)]
            - variance.window_start[(row, gate)])
            / 1e6;
        let length_scale_upper = speed[(row, gate)] * sampling_time;
        let length_scale_lower = speed[(row, gate)] * options.ray_accumulation_time
            + 2.0 * vert.height[gate] * sin_half_divergence;
        *epsilon = dissipation_rate_from_scales(
            variance.variance[(row, gate)],
            length_scale_lower,
            length_scale_upper,
        );
    }

    // Demand a reasonable share of the typical sample count before trusting a window.
    let populated: Vec<f64> = variance
        .nsamples
        .iter()
        .filter(|&&count| count > 2)
        .map(|&count| count as f64)
        .collect();
    let threshold = match median(populated.into_iter()) {
        Some(median_count) => (0.55 * median_count).max(3.0),
        None => 3.0,
    };
    for ((row, gate), epsilon) in dissipation_rate.indexed_iter_mut() {
        if (variance.nsamples[(row, gate)] as f64) < threshold {
            *epsilon = f64::NAN;
        }
    }

    let mask = dissipation_rate.mapv(|value| !value.is_finite());
    Ok(Turbulence::new(
        vert.time.clone(),
        vert.height.clone(),
        dissipation_rate,
        mask,
    )?)
}

/// Kolmogorov relation between the velocity variance and the sampled length scales.
fn dissipation_rate_from_scales(
    variance: f64,
    length_scale_lower: f64,
    length_scale_upper: f64,
) -> f64 {
    let scales = length_scale_upper.powf(2.0 / 3.0) - length_scale_lower.powf(2.0 / 3.0);
    2.0 * std::f64::consts::PI
        * (2.0 / (3.0 * KOLMOGOROV_CONSTANT)).powf(1.5)
        * variance.powf(1.5)
        * scales.powf(-1.5)
}

/// Interpolate the horizontal wind speed onto the vertical grid (bilinear inside the hull,
/// nearest outside) and smooth it with an unmasked rolling mean over the variance period.
fn preprocess_horizontal_wind(
    vert: &VerticalWind,
    hori: &HorizontalWind,
    options: &TurbulenceOptions,
) -> Result<Array2<f64>> {
    if hori.speed.dim() != (hori.time.len(), hori.height.len()) {
        return Err(Error::Shape(format!(
            "horizontal wind has shape {:?}, expected {:?}",
            hori.speed.dim(),
            (hori.time.len(), hori.height.len())
        )));
    }
    if hori.speed.iter().any(|value| !value.is_finite()) {
        return Err(Error::InvalidArgument(
            "horizontal wind speed must not contain NaNs".to_string(),
        ));
    }

    let source_time: Vec<f64> = hori.time.iter().map(|&t| t as f64).collect();
    let source_height: Vec<f64> = hori.height.to_vec();
    let interpolator = GridInterpolator::new(
        &source_time,
        &source_height,
        &hori.speed,
    );

    let mut speed = Array2::zeros((vert.time.len(), vert.height.len()));
    for ((row, gate), value) in speed.indexed_iter_mut() {
        let t = vert.time[row] as f64;
        let h = vert.height[gate];
        let linear = interpolator.linear(t, h);
        *value = if linear.is_finite() {
            linear
        } else {
            interpolator.nearest(t, h)
        };
    }
    if speed.iter().any(|value| !value.is_finite()) {
        return Err(Error::Numerical(
            "interpolated horizontal wind contains non-finite values".to_string(),
        ));
    }

    let coord: Vec<f64> = vert.time.iter().map(|&t| t as f64).collect();
    kernel::rolling_mean(&coord, speed.view(), None, options.period / 2.0 * 1e6)
}

fn median(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Deterministic pseudo-noise, uniform in [-limit, limit] (variance limit²/3).
    struct Lcg(u64);

    impl Lcg {
        fn next_uniform(&mut self, limit: f64) -> f64 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let unit = (self.0 >> 11) as f64 / (1_u64 << 53) as f64;
            (2.0 * unit - 1.0) * limit
        }
    }

    fn noise_series(ntime: usize, limit: f64) -> Array2<f64> {
        let mut rng = Lcg(42);
        Array2::from_shape_fn((ntime, 1), |_| rng.next_uniform(limit))
    }

    fn vertical(ntime: usize, w: Array2<f64>) -> VerticalWind {
        VerticalWind {
            time: (0..ntime as i64).map(|i| i * 1_000_000).collect(),
            height: ndarray::array![500.0],
            w,
            mask: Array2::from_elem((ntime, 1), false),
        }
    }

    fn horizontal(speed: f64) -> HorizontalWind {
        HorizontalWind {
            time: vec![0, 3_600_000_000],
            height: ndarray::array![0.0, 1000.0],
            speed: Array2::from_elem((2, 2), speed),
        }
    }

    #[test]
    fn test_variance_of_uniform_noise_is_recovered() {
        let ntime = 3600;
        let limit = 0.9;
        let vert = vertical(ntime, noise_series(ntime, limit));
        let coord: Vec<f64> = vert.time.iter().map(|&t| t as f64).collect();
        let result =
            kernel::rolling_variance(&coord, vert.w.view(), &vert.mask, 300.0 * 1e6).unwrap();
        let expected = limit * limit / 3.0;
        // Away from the edges every window holds ~600 samples of stationary noise.
        assert_abs_diff_eq!(result.variance[(1800, 0)], expected, epsilon = 0.1 * expected);
        assert_eq!(result.nsamples[(1800, 0)], 600);
    }

    #[test]
    fn test_dissipation_rate_monotonicity() {
        let variance = 0.25;
        let low_wind = dissipation_rate_from_scales(variance, 6.0, 3000.0);
        let high_wind = dissipation_rate_from_scales(variance, 12.0, 6000.0);
        // Faster advection stretches the sampled scales and lowers ε for the same variance.
        assert!(high_wind < low_wind);

        let small_var = dissipation_rate_from_scales(0.25, 6.0, 3000.0);
        let large_var = dissipation_rate_from_scales(0.5, 6.0, 3000.0);
        assert!(large_var > small_var);
    }

    #[test]
    fn test_turbulence_product_on_synthetic_noise() {
        let ntime = 3600;
        let vert = vertical(ntime, noise_series(ntime, 0.9));
        let hori = horizontal(5.0);
        let product = turbulence(&vert, &hori, &TurbulenceOptions::default()).unwrap();

        assert_eq!(product.time().len(), ntime);
        let epsilon = product.dissipation_rate()[(1800, 0)];
        assert!(epsilon.is_finite() && epsilon > 0.0);
        assert!(!product.mask()[(1800, 0)]);

        // ε falls when the same variance rides on a stronger horizontal wind.
        let windy = turbulence(&vertical(ntime, noise_series(ntime, 0.9)), &horizontal(10.0), &TurbulenceOptions::default())
            .unwrap();
        assert!(windy.dissipation_rate()[(1800, 0)] < epsilon);
    }

    #[test]
    fn test_sample_starved_cells_are_masked() {
        let ntime = 40;
        let mut vert = vertical(ntime, noise_series(ntime, 0.5));
        for row in 0..ntime {
            if row % 2 == 0 {
                vert.mask[(row, 0)] = true;
            }
        }
        // Mask everything in the second half entirely.
        for row in ntime / 2..ntime {
            vert.mask[(row, 0)] = true;
        }
        let options = TurbulenceOptions {
            period: 10.0,
            ..TurbulenceOptions::default()
        };
        let product = turbulence(&vert, &horizontal(5.0), &options).unwrap();
        assert!(product.mask()[(ntime - 1, 0)]);
    }

    #[test]
    fn test_nan_horizontal_wind_is_rejected() {
        let vert = vertical(10, noise_series(10, 0.5));
        let mut hori = horizontal(5.0);
        hori.speed[(0, 0)] = f64::NAN;
        let result = turbulence(&vert, &hori, &TurbulenceOptions::default());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
