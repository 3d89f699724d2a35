//! Descriptive statistics over numeric samples.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
}

/// Summarize `values`, ignoring NaN. Returns `None` for an empty sample.
pub fn describe(values: &[f64]) -> Option<Summary> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let count = sorted.len();
    Some(Summary {
        count,
        mean: sorted.iter().sum::<f64>() / count as f64,
        median: quantile(&sorted, 0.5)?,
        min: sorted[0],
        max: sorted[count - 1],
        q1: quantile(&sorted, 0.25)?,
        q3: quantile(&sorted, 0.75)?,
    })
}

/// Quantile of an ascending sample with linear interpolation at position
/// `q * (n - 1)`. `None` for an empty sample.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let pos = q.clamp(0.0, 1.0) * last as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let s = describe(&[4.0, 1.0, 3.0, 2.0, f64::NAN]).unwrap();
        assert_eq!(s.count, 4);
        assert_eq!(s.mean, 2.5);
        assert_eq!(s.median, 2.5);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 4.0);
        assert_eq!(s.q1, 1.75);
        assert_eq!(s.q3, 3.25);
    }

    #[test]
    fn test_single_value() {
        let s = describe(&[7.0]).unwrap();
        assert_eq!((s.q1, s.median, s.q3), (7.0, 7.0, 7.0));
    }

    #[test]
    fn test_empty() {
        assert!(describe(&[]).is_none());
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_quantile_interpolates() {
        assert_eq!(quantile(&[10.0, 20.0], 0.25), Some(12.5));
        assert_eq!(quantile(&[10.0, 20.0], 2.0), Some(20.0));
    }
}
