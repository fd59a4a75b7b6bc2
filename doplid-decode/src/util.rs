use crate::result::{Error, Result};
use ndarray::Array1;

/// Indices that sort `values` ascending, ties keeping their original order.
pub(crate) fn argsort(values: &[i64]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..values.len()).collect();
    indices.sort_by_key(|&i| values[i]);
    indices
}

/// Indices of samples whose time is strictly greater than every earlier time. The first sample
/// is always kept.
pub(crate) fn strictly_increasing_indices(time: &[i64]) -> Vec<usize> {
    let mut keep = Vec::with_capacity(time.len());
    let mut latest: Option<i64> = None;
    for (i, &t) in time.iter().enumerate() {
        if latest.map_or(true, |prev| t > prev) {
            keep.push(i);
            latest = Some(t);
        }
    }
    keep
}

/// Whether two range grids agree within an absolute tolerance, element-wise.
pub(crate) fn grids_close(a: &Array1<f64>, b: &Array1<f64>, atol: f64) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| (x - y).abs() <= atol)
}

/// The longest common prefix of the given strings.
pub(crate) fn common_prefix(values: &[&str]) -> String {
    let Some(first) = values.first() else {
        return String::new();
    };
    let mut prefix = first.len();
    for value in &values[1..] {
        prefix = first
            .bytes()
            .zip(value.bytes())
            .take(prefix)
            .take_while(|(a, b)| a == b)
            .count();
    }
    first[..prefix].to_string()
}

/// Require that every value in `values` is equal, returning the common value.
pub(crate) fn merge_all_equal<T: PartialEq + Clone + std::fmt::Debug>(
    key: &str,
    values: &[T],
) -> Result<T> {
    let Some(first) = values.first() else {
        return Err(Error::MergeMismatch {
            reason: format!("cannot merge empty list for key {key}"),
        });
    };
    if values.iter().any(|value| value != first) {
        return Err(Error::MergeMismatch {
            reason: format!("header key {key} differs between files: {values:?}"),
        });
    }
    Ok(first.clone())
}

/// Parse a float, attaching the field name and filename to the error.
pub(crate) fn parse_f64(value: &str, what: &'static str, filename: &str) -> Result<f64> {
    value.trim().parse::<f64>().map_err(|_| Error::InvalidNumber {
        value: value.to_string(),
        what,
        filename: filename.to_string(),
    })
}

/// Parse an integer, attaching the field name and filename to the error.
pub(crate) fn parse_i64(value: &str, what: &'static str, filename: &str) -> Result<i64> {
    value.trim().parse::<i64>().map_err(|_| Error::InvalidNumber {
        value: value.to_string(),
        what,
        filename: filename.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argsort_is_stable() {
        assert_eq!(argsort(&[3, 1, 2, 1]), vec![1, 3, 2, 0]);
    }

    #[test]
    fn test_strictly_increasing_indices_drops_repeats() {
        assert_eq!(strictly_increasing_indices(&[1, 1, 2, 0, 3]), vec![0, 2, 4]);
    }

    #[test]
    fn test_common_prefix() {
        assert_eq!(common_prefix(&["Stare_2023", "Stare_2024"]), "Stare_202");
        assert_eq!(common_prefix(&[]), "");
    }
}
