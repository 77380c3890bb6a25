use mrq_core::Error;

use crate::{all_finite, WindowSeries};

/// Welford accumulator over a fixed-size window: `mean`/`m2` describe the
/// `n` values currently inside the window.
struct WelfordState {
    n: usize,
    mean: f64,
    m2: f64,
}

impl WelfordState {
    fn new() -> Self {
        Self { n: 0, mean: 0.0, m2: 0.0 }
    }

    fn push(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    /// Remove `x` from the window. `x` must be a value previously pushed
    /// and not yet removed (the oldest surviving element).
    fn remove(&mut self, x: f64) {
        if self.n <= 1 {
            self.n = 0;
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let new_n = self.n - 1;
        let delta = x - self.mean;
        let new_mean = self.mean - delta / new_n as f64;
        self.m2 -= delta * (x - new_mean);
        self.mean = new_mean;
        self.n = new_n;
    }

    fn variance(&self, sample: bool) -> f64 {
        let divisor = if sample {
            (self.n.saturating_sub(1)) as f64
        } else {
            self.n as f64
        };
        if divisor <= 0.0 {
            0.0
        } else {
            (self.m2 / divisor).max(0.0)
        }
    }
}

/// Walks `values` with a window of `window_size`, maintaining `(mean, std)`
/// per right-aligned window position via decremental Welford. `sample`
/// selects sample variance (divide by W-1) vs population variance
/// (divide by W).
pub(crate) fn welford_window_stats(
    values: &[f64],
    window_size: usize,
    sample: bool,
) -> Vec<(f64, f64)> {
    let n = values.len();
    let w = window_size;
    let mut out = Vec::with_capacity(n - w + 1);

    let mut state = WelfordState::new();
    for &v in &values[0..w] {
        state.push(v);
    }
    out.push((state.mean, state.variance(sample).sqrt()));

    for i in w..n {
        state.remove(values[i - w]);
        state.push(values[i]);
        out.push((state.mean, state.variance(sample).sqrt()));
    }

    out
}

/// Companion to [`crate::compute_window_metrics`]: the same four aligned
/// series, but standard deviation uses sample variance (divide by W-1)
/// computed via Welford's online recurrence throughout, for callers who
/// need the unbiased estimator rather than the population one.
pub fn compute_window_metrics_welford(values: &[f64], window_size: usize) -> Result<WindowSeries, Error> {
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

    let stats = welford_window_stats(values, w, true);
    let mut series = WindowSeries::with_capacity(stats.len());

    for (i, (mean, std)) in stats.into_iter().enumerate() {
        let z = if std < crate::STD_EPSILON {
            0.0
        } else {
            (values[i + w - 1] - mean) / std
        };
        series.push(z, mean, std);
    }

    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_variance_uses_w_minus_one() {
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let series = compute_window_metrics_welford(&values, values.len()).unwrap();
        // population std of this set is 2.0; sample std is slightly larger.
        assert!(series.rolling_std[0] > 2.0);
        assert!((series.rolling_std[0] - 2.138_089_935_299_395).abs() < 1e-9);
    }

    #[test]
    fn sliding_removal_matches_fresh_accumulation() {
        let values = vec![1.0, 3.0, 5.0, 2.0, 8.0, 4.0, 6.0, 9.0, 0.0, 7.0];
        let w = 4;
        let incremental = welford_window_stats(&values, w, false);
        for (idx, (mean, std)) in incremental.iter().enumerate() {
            let window = &values[idx..idx + w];
            let fresh_mean = window.iter().sum::<f64>() / w as f64;
            let fresh_var = window.iter().map(|v| (v - fresh_mean).powi(2)).sum::<f64>() / w as f64;
            assert!((mean - fresh_mean).abs() < 1e-9);
            assert!((std - fresh_var.sqrt()).abs() < 1e-9);
        }
    }
}
