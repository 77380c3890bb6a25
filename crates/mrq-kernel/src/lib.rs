pub mod sliding;
pub mod welford;

#[cfg(test)]
mod reference;

pub use sliding::{compute_window_metrics, WindowSeries};
pub use welford::compute_window_metrics_welford;

/// Numerically meaningless division is clamped away below this threshold;
/// z-scores against a near-zero standard deviation are defined as 0.
pub const STD_EPSILON: f64 = 1e-10;

/// Selection thresholds from spec: above these magnitudes the incremental
/// sliding-sum path is routed through Welford's recurrence instead, to
/// avoid catastrophic cancellation in `sum_of_squares - sum*sum/n`.
pub const WELFORD_SUM_THRESHOLD: f64 = 1e12;
pub const WELFORD_WINDOW_THRESHOLD: usize = 10_000;

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}
