use mrq_core::Error;

use crate::{all_finite, welford::welford_window_stats, STD_EPSILON, WELFORD_SUM_THRESHOLD, WELFORD_WINDOW_THRESHOLD};

/// Four equal-length series aligned by the right edge of a sliding window
/// of size `W` over an input of length `N`: each has length `N - W + 1`.
#[derive(Debug, Clone, Default)]
pub struct WindowSeries {
    pub z_score: Vec<f64>,
    pub moving_average: Vec<f64>,
    pub rolling_std: Vec<f64>,
    pub bollinger_upper: Vec<f64>,
    pub bollinger_middle: Vec<f64>,
    pub bollinger_lower: Vec<f64>,
}

impl WindowSeries {
    pub(crate) fn with_capacity(n: usize) -> Self {
        Self {
            z_score: Vec::with_capacity(n),
            moving_average: Vec::with_capacity(n),
            rolling_std: Vec::with_capacity(n),
            bollinger_upper: Vec::with_capacity(n),
            bollinger_middle: Vec::with_capacity(n),
            bollinger_lower: Vec::with_capacity(n),
        }
    }

    pub(crate) fn push(&mut self, z: f64, ma: f64, std: f64) {
        self.z_score.push(z);
        self.moving_average.push(ma);
        self.rolling_std.push(std);
        self.bollinger_middle.push(ma);
        self.bollinger_upper.push(ma + 2.0 * std);
        self.bollinger_lower.push(ma - 2.0 * std);
    }

    pub fn len(&self) -> usize {
        self.z_score.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z_score.is_empty()
    }
}

/// Single-pass sliding-window mean, population standard deviation,
/// z-score, and Bollinger bands over `values`, window size `window_size`.
///
/// O(N) time, O(W) extra memory: `sum` and `sum_of_squares` are updated
/// incrementally as the window slides (add the entering value, subtract
/// the departing one). When that incremental path would be numerically
/// unreliable — `|sum| > 1e12` or `window_size > 10_000` — the same
/// population-variance computation is instead routed through Welford's
/// recurrence with decremental removal, which does not difference two
/// large near-equal quantities.
pub fn compute_window_metrics(values: &[f64], window_size: usize) -> Result<WindowSeries, Error> {
    let n = values.len();
    let w = window_size;
    if w == 0 || n < w {
        return Err(Error::InsufficientData(format!(
            "need at least {w} values, got {n}"
        )));
    }
    if !all_finite(values) {
        return Err(Error::InvalidInput("non-finite value in series".into()));
    }

    let initial_sum: f64 = values[0..w].iter().sum();
    if initial_sum.abs() > WELFORD_SUM_THRESHOLD || w > WELFORD_WINDOW_THRESHOLD {
        return Ok(from_mean_std(values, w, welford_window_stats(values, w, false)));
    }

    let mut series = WindowSeries::with_capacity(n - w + 1);
    let mut sum: f64 = initial_sum;
    let mut sum_sq: f64 = values[0..w].iter().map(|v| v * v).sum();

    push_one(&mut series, values, w, 0, sum, sum_sq);

    for i in w..n {
        let departing = values[i - w];
        let entering = values[i];
        sum += entering - departing;
        sum_sq += entering * entering - departing * departing;
        push_one(&mut series, values, w, i - w + 1, sum, sum_sq);
    }

    Ok(series)
}

fn push_one(series: &mut WindowSeries, values: &[f64], w: usize, window_start: usize, sum: f64, sum_sq: f64) {
    let wf = w as f64;
    let mean = sum / wf;
    let variance = ((sum_sq / wf) - mean * mean).max(0.0);
    let std = variance.sqrt();
    let last = values[window_start + w - 1];
    let z = if std < STD_EPSILON { 0.0 } else { (last - mean) / std };
    series.push(z, mean, std);
}

fn from_mean_std(values: &[f64], w: usize, stats: Vec<(f64, f64)>) -> WindowSeries {
    let mut series = WindowSeries::with_capacity(stats.len());
    for (i, (mean, std)) in stats.into_iter().enumerate() {
        let last = values[i + w - 1];
        let z = if std < STD_EPSILON { 0.0 } else { (last - mean) / std };
        series.push(z, mean, std);
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_input() {
        let err = compute_window_metrics(&[1.0, 2.0], 5).unwrap_err();
        assert!(matches!(err, Error::InsufficientData(_)));
    }

    #[test]
    fn rejects_non_finite_input() {
        let err = compute_window_metrics(&[1.0, f64::NAN, 3.0, 4.0], 2).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn moving_average_matches_arithmetic_mean() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let series = compute_window_metrics(&values, 3).unwrap();
        assert_eq!(series.len(), 4);
        assert!((series.moving_average[0] - 2.0).abs() < 1e-9); // mean(1,2,3)
        assert!((series.moving_average[3] - 5.0).abs() < 1e-9); // mean(4,5,6)
    }

    #[test]
    fn bollinger_bands_straddle_the_moving_average() {
        let values = vec![10.0, 11.0, 9.0, 12.0, 8.0, 13.0];
        let series = compute_window_metrics(&values, 3).unwrap();
        for i in 0..series.len() {
            assert!((series.bollinger_middle[i] - series.moving_average[i]).abs() < 1e-12);
            assert!(series.bollinger_upper[i] >= series.bollinger_middle[i]);
            assert!(series.bollinger_lower[i] <= series.bollinger_middle[i]);
        }
    }

    #[test]
    fn large_window_routes_through_welford_without_panicking() {
        let values: Vec<f64> = (0..20_100).map(|i| (i % 7) as f64).collect();
        let series = compute_window_metrics(&values, 10_050).unwrap();
        assert_eq!(series.len(), values.len() - 10_050 + 1);
    }
}
