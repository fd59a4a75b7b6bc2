//!
//! Deterministic 1-D two-means clustering for the background-profile split. Lloyd iteration
//! initialised at the minimum and maximum value, so repeated runs always agree.
//!

/// Result of a two-means pass over scalar observations.
pub(crate) struct TwoMeans {
    /// Cluster label (0 or 1) per observation.
    pub labels: Vec<usize>,
    /// Cluster centers; `centers[label]` is the mean of that cluster.
    pub centers: [f64; 2],
}

pub(crate) fn two_means(values: &[f64]) -> TwoMeans {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut centers = [min, max];
    let mut labels = vec![0; values.len()];

    for _ in 0..100 {
        let mut changed = false;
        for (label, &value) in labels.iter_mut().zip(values.iter()) {
            let nearest = usize::from((value - centers[1]).abs() < (value - centers[0]).abs());
            if nearest != *label {
                *label = nearest;
                changed = true;
            }
        }

        for cluster in 0..2 {
            let members: Vec<f64> = labels
                .iter()
                .zip(values.iter())
                .filter(|(&label, _)| label == cluster)
                .map(|(_, &value)| value)
                .collect();
            if !members.is_empty() {
                centers[cluster] = members.iter().sum::<f64>() / members.len() as f64;
            }
        }
        if !changed {
            break;
        }
    }
    TwoMeans { labels, centers }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_separates_two_clumps() {
        let values = [1.0, 1.1, 0.9, 10.0, 10.2, 9.8];
        let result = two_means(&values);
        assert_eq!(&result.labels[..3], &[0, 0, 0]);
        assert_eq!(&result.labels[3..], &[1, 1, 1]);
        assert_abs_diff_eq!(result.centers[0], 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(result.centers[1], 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_identical_values_collapse_to_one_cluster() {
        let result = two_means(&[2.0, 2.0, 2.0]);
        assert!(result.labels.iter().all(|&label| label == 0));
    }
}
