//!
//! Bilinear interpolation over a rectilinear (x, y) grid with a nearest-neighbour companion
//! for points outside the grid's convex hull. The turbulence pipeline evaluates both and
//! overwrites NaN cells of the linear result with the nearest one.
//!

use ndarray::Array2;

pub(crate) struct GridInterpolator<'a> {
    x: &'a [f64],
    y: &'a [f64],
    values: &'a Array2<f64>,
}

impl<'a> GridInterpolator<'a> {
    /// A new interpolator over ascending axes `x` (rows) and `y` (columns).
    pub fn new(x: &'a [f64], y: &'a [f64], values: &'a Array2<f64>) -> Self {
        debug_assert_eq!(values.dim(), (x.len(), y.len()));
        Self { x, y, values }
    }

    /// Bilinear interpolation; NaN outside the grid bounds.
    pub fn linear(&self, xq: f64, yq: f64) -> f64 {
        let Some((i, tx)) = segment(self.x, xq) else {
            return f64::NAN;
        };
        let Some((j, ty)) = segment(self.y, yq) else {
            return f64::NAN;
        };
        let v00 = self.values[(i, j)];
        let v10 = self.values[(i + 1, j)];
        let v01 = self.values[(i, j + 1)];
        let v11 = self.values[(i + 1, j + 1)];
        let low = v00 + tx * (v10 - v00);
        let high = v01 + tx * (v11 - v01);
        low + ty * (high - low)
    }

    /// Value of the nearest grid node; extrapolates by clamping outside the bounds.
    pub fn nearest(&self, xq: f64, yq: f64) -> f64 {
        self.values[(nearest_index(self.x, xq), nearest_index(self.y, yq))]
    }
}

/// The segment index and fractional position of `q` along `axis`, or None outside the bounds.
fn segment(axis: &[f64], q: f64) -> Option<(usize, f64)> {
    let n = axis.len();
    if n == 0 || q < axis[0] || q > axis[n - 1] {
        return None;
    }
    if n == 1 {
        // A single-node axis has no segment; only the exact node is inside the hull.
        return (q == axis[0]).then_some((0, 0.0));
    }
    let upper = axis.partition_point(|&value| value <= q).min(n - 1);
    let i = upper.saturating_sub(1);
    let width = axis[i + 1] - axis[i];
    Some((i, (q - axis[i]) / width))
}

fn nearest_index(axis: &[f64], q: f64) -> usize {
    if axis.is_empty() {
        return 0;
    }
    let upper = axis.partition_point(|&value| value <= q);
    if upper == 0 {
        return 0;
    }
    if upper >= axis.len() {
        return axis.len() - 1;
    }
    if (q - axis[upper - 1]).abs() <= (axis[upper] - q).abs() {
        upper - 1
    } else {
        upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_bilinear_interpolation() {
        let x = [0.0, 1.0];
        let y = [0.0, 2.0];
        let values = array![[0.0, 2.0], [4.0, 6.0]];
        let interp = GridInterpolator::new(&x, &y, &values);
        assert_abs_diff_eq!(interp.linear(0.5, 1.0), 3.0);
        assert_abs_diff_eq!(interp.linear(0.0, 0.0), 0.0);
        assert_abs_diff_eq!(interp.linear(1.0, 2.0), 6.0);
    }

    #[test]
    fn test_linear_is_nan_outside_bounds() {
        let x = [0.0, 1.0];
        let y = [0.0, 1.0];
        let values = array![[1.0, 1.0], [1.0, 1.0]];
        let interp = GridInterpolator::new(&x, &y, &values);
        assert!(interp.linear(-0.1, 0.5).is_nan());
        assert!(interp.linear(0.5, 1.5).is_nan());
    }

    #[test]
    fn test_nearest_clamps_outside_bounds() {
        let x = [0.0, 1.0];
        let y = [0.0, 1.0];
        let values = array![[1.0, 2.0], [3.0, 4.0]];
        let interp = GridInterpolator::new(&x, &y, &values);
        assert_abs_diff_eq!(interp.nearest(-5.0, -5.0), 1.0);
        assert_abs_diff_eq!(interp.nearest(5.0, 5.0), 4.0);
        assert_abs_diff_eq!(interp.nearest(0.1, 0.9), 2.0);
    }
}
