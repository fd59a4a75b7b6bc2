//!
//! Small 2-D image filters used by the noise engine: a separable uniform box mean, a
//! median filter and a separable Gaussian blur. Boundary handling matters for the masks built
//! on top of them: the box and Gaussian filters reflect at the edges (`d c b a | a b c d`),
//! the median filter pads with zeros.
//!

use ndarray::Array2;

/// Reflect an out-of-bounds index into `[0, len)`, mirroring about the array edges.
fn reflect(index: isize, len: usize) -> usize {
    let len = len as isize;
    let mut index = index;
    loop {
        if index < 0 {
            index = -index - 1;
        } else if index >= len {
            index = 2 * len - 1 - index;
        } else {
            return index as usize;
        }
    }
}

fn box_mean_axis0(values: &Array2<f64>, size: usize) -> Array2<f64> {
    let (rows, cols) = values.dim();
    let half = size as isize / 2;
    let mut out = Array2::zeros((rows, cols));
    for r in 0..rows {
        for offset in -half..=half {
            let source = reflect(r as isize + offset, rows);
            for c in 0..cols {
                out[(r, c)] += values[(source, c)];
            }
        }
    }
    out / size as f64
}

fn box_mean_axis1(values: &Array2<f64>, size: usize) -> Array2<f64> {
    let (rows, cols) = values.dim();
    let half = size as isize / 2;
    let mut out = Array2::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            let mut sum = 0.0;
            for offset in -half..=half {
                sum += values[(r, reflect(c as isize + offset, cols))];
            }
            out[(r, c)] = sum / size as f64;
        }
    }
    out
}

/// Uniform box mean with the given odd (rows, cols) window and reflecting boundaries.
pub(crate) fn uniform_filter(values: &Array2<f64>, size: (usize, usize)) -> Array2<f64> {
    box_mean_axis1(&box_mean_axis0(values, size.0), size.1)
}

/// Median filter with the given odd square window, padding with zeros outside the array.
pub(crate) fn median_filter_zero_padded(values: &Array2<f64>, size: usize) -> Array2<f64> {
    let (rows, cols) = values.dim();
    let half = size as isize / 2;
    let mut out = Array2::zeros((rows, cols));
    let mut window = Vec::with_capacity(size * size);
    for r in 0..rows {
        for c in 0..cols {
            window.clear();
            for dr in -half..=half {
                for dc in -half..=half {
                    let rr = r as isize + dr;
                    let cc = c as isize + dc;
                    if rr >= 0 && rr < rows as isize && cc >= 0 && cc < cols as isize {
                        window.push(values[(rr as usize, cc as usize)]);
                    } else {
                        window.push(0.0);
                    }
                }
            }
            window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            out[(r, c)] = window[window.len() / 2];
        }
    }
    out
}

fn gaussian_kernel(sigma: f64, radius: usize) -> Vec<f64> {
    let mut kernel: Vec<f64> = (-(radius as isize)..=radius as isize)
        .map(|offset| (-0.5 * (offset as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    for weight in &mut kernel {
        *weight /= total;
    }
    kernel
}

/// Separable Gaussian blur over both axes with reflecting boundaries.
pub(crate) fn gaussian_filter(values: &Array2<f64>, sigma: f64, radius: usize) -> Array2<f64> {
    let kernel = gaussian_kernel(sigma, radius);
    let (rows, cols) = values.dim();
    let half = radius as isize;

    let mut pass0 = Array2::zeros((rows, cols));
    for r in 0..rows {
        for (weight, offset) in kernel.iter().zip(-half..=half) {
            let source = reflect(r as isize + offset, rows);
            for c in 0..cols {
                pass0[(r, c)] += weight * values[(source, c)];
            }
        }
    }

    let mut pass1 = Array2::zeros((rows, cols));
    for r in 0..rows {
        for c in 0..cols {
            let mut sum = 0.0;
            for (weight, offset) in kernel.iter().zip(-half..=half) {
                sum += weight * pass0[(r, reflect(c as isize + offset, cols))];
            }
            pass1[(r, c)] = sum;
        }
    }
    pass1
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_uniform_filter_on_constant_field_is_identity() {
        let values = Array2::from_elem((10, 4), 3.5);
        let filtered = uniform_filter(&values, (5, 3));
        for value in filtered.iter() {
            assert_abs_diff_eq!(*value, 3.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_uniform_filter_reflects_at_edges() {
        let values = array![[1.0], [2.0], [3.0]];
        let filtered = uniform_filter(&values, (3, 1));
        // Row 0 averages the reflected window (1, 1, 2).
        assert_abs_diff_eq!(filtered[(0, 0)], 4.0 / 3.0);
        assert_abs_diff_eq!(filtered[(1, 0)], 2.0);
    }

    #[test]
    fn test_median_filter_pads_with_zeros() {
        let values = Array2::from_elem((5, 5), 1.0);
        let filtered = median_filter_zero_padded(&values, 5);
        // The interior window is all ones; the corner window holds 16 padded zeros.
        assert_abs_diff_eq!(filtered[(2, 2)], 1.0);
        assert_abs_diff_eq!(filtered[(0, 0)], 0.0);
    }

    #[test]
    fn test_gaussian_filter_preserves_constant_fields() {
        let values = Array2::from_elem((8, 8), 2.0);
        let filtered = gaussian_filter(&values, 2.0, 4);
        for value in filtered.iter() {
            assert_abs_diff_eq!(*value, 2.0, epsilon = 1e-9);
        }
    }
}
