//!
//! A plain Nelder–Mead simplex minimiser. The background-shape fits are the only consumers;
//! they need no gradients and only a few hundred iterations on two to five parameters.
//!

/// Minimise `f` starting from `x0`, returning the best parameter vector found.
///
/// Uses the standard reflection/expansion/contraction/shrink coefficients and a 5% initial
/// perturbation per coordinate (0.00025 for zero coordinates). Terminates after `max_iter`
/// iterations or once the simplex has collapsed below the absolute tolerances.
pub(crate) fn nelder_mead(f: impl Fn(&[f64]) -> f64, x0: &[f64], max_iter: usize) -> Vec<f64> {
    const REFLECTION: f64 = 1.0;
    const EXPANSION: f64 = 2.0;
    const CONTRACTION: f64 = 0.5;
    const SHRINK: f64 = 0.5;
    const XATOL: f64 = 1e-4;
    const FATOL: f64 = 1e-4;

    let n = x0.len();
    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(x0.to_vec());
    for i in 0..n {
        let mut point = x0.to_vec();
        if point[i] != 0.0 {
            point[i] *= 1.05;
        } else {
            point[i] = 0.00025;
        }
        simplex.push(point);
    }
    let mut fvalues: Vec<f64> = simplex.iter().map(|point| f(point)).collect();

    for _ in 0..max_iter {
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| {
            fvalues[a]
                .partial_cmp(&fvalues[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        fvalues = order.iter().map(|&i| fvalues[i]).collect();

        let spread_x = simplex[1..]
            .iter()
            .flat_map(|point| {
                point
                    .iter()
                    .zip(simplex[0].iter())
                    .map(|(a, b)| (a - b).abs())
            })
            .fold(0.0_f64, f64::max);
        let spread_f = fvalues[1..]
            .iter()
            .map(|value| (value - fvalues[0]).abs())
            .fold(0.0_f64, f64::max);
        if spread_x <= XATOL && spread_f <= FATOL {
            break;
        }

        let centroid: Vec<f64> = (0..n)
            .map(|i| simplex[..n].iter().map(|point| point[i]).sum::<f64>() / n as f64)
            .collect();
        let worst = simplex[n].clone();
        let along = |scale: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(worst.iter())
                .map(|(c, w)| c + scale * (c - w))
                .collect()
        };

        let reflected = along(REFLECTION);
        let f_reflected = f(&reflected);

        if f_reflected < fvalues[0] {
            let expanded = along(EXPANSION);
            let f_expanded = f(&expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                fvalues[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                fvalues[n] = f_reflected;
            }
        } else if f_reflected < fvalues[n - 1] {
            simplex[n] = reflected;
            fvalues[n] = f_reflected;
        } else if f_reflected < fvalues[n] {
            let contracted = along(CONTRACTION);
            let f_contracted = f(&contracted);
            if f_contracted <= f_reflected {
                simplex[n] = contracted;
                fvalues[n] = f_contracted;
            } else {
                shrink(&mut simplex, &mut fvalues, &f, SHRINK);
            }
        } else {
            let contracted = along(-CONTRACTION);
            let f_contracted = f(&contracted);
            if f_contracted < fvalues[n] {
                simplex[n] = contracted;
                fvalues[n] = f_contracted;
            } else {
                shrink(&mut simplex, &mut fvalues, &f, SHRINK);
            }
        }
    }

    let best = fvalues
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);
    simplex.swap_remove(best)
}

fn shrink(
    simplex: &mut [Vec<f64>],
    fvalues: &mut [f64],
    f: &impl Fn(&[f64]) -> f64,
    factor: f64,
) {
    let best = simplex[0].clone();
    for index in 1..simplex.len() {
        for (coordinate, anchor) in simplex[index].iter_mut().zip(best.iter()) {
            *coordinate = anchor + factor * (*coordinate - anchor);
        }
        fvalues[index] = f(&simplex[index]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_minimises_a_quadratic_bowl() {
        let best = nelder_mead(
            |x| (x[0] - 3.0).powi(2) + (x[1] + 1.5).powi(2),
            &[0.0, 0.0],
            1200,
        );
        assert_abs_diff_eq!(best[0], 3.0, epsilon = 1e-3);
        assert_abs_diff_eq!(best[1], -1.5, epsilon = 1e-3);
    }

    #[test]
    fn test_minimises_rosenbrock() {
        let best = nelder_mead(
            |x| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2),
            &[-1.2, 1.0],
            3000,
        );
        assert_abs_diff_eq!(best[0], 1.0, epsilon = 1e-2);
        assert_abs_diff_eq!(best[1], 1.0, epsilon = 1e-2);
    }
}
