//! Deliberately naive O(N*W) reference implementation, reachable only from
//! tests. Used to check the sliding-window path for correctness and
//! throughput correctness properties.

use crate::{WindowSeries, STD_EPSILON};

pub fn naive_reference(values: &[f64], window_size: usize) -> WindowSeries {
    let n = values.len();
    let w = window_size;
    let mut series = WindowSeries::with_capacity(n - w + 1);

    for end in w..=n {
        let window = &values[end - w..end];
        let mean = window.iter().sum::<f64>() / w as f64;
        let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / w as f64;
        let std = variance.max(0.0).sqrt();
        let last = values[end - 1];
        let z = if std < STD_EPSILON { 0.0 } else { (last - mean) / std };
        series.push(z, mean, std);
    }

    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute_window_metrics;

    fn lcg(seed: &mut u64) -> f64 {
        *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((*seed >> 11) as f64) / ((1u64 << 53) as f64)
    }

    #[test]
    fn matches_sliding_window_path() {
        let mut seed = 42u64;
        let values: Vec<f64> = (0..500).map(|_| lcg(&mut seed) * 200.0 - 100.0).collect();
        let w = 20;

        let fast = compute_window_metrics(&values, w).unwrap();
        let slow = naive_reference(&values, w);

        assert_eq!(fast.len(), slow.len());
        for i in 0..fast.len() {
            assert!((fast.moving_average[i] - slow.moving_average[i]).abs() < 1e-9);
            assert!((fast.z_score[i] - slow.z_score[i]).abs() < 1e-10);
        }
    }

    #[test]
    fn constant_input_yields_zero_z_scores() {
        let values = vec![7.0; 100];
        let fast = compute_window_metrics(&values, 10).unwrap();
        assert!(fast.z_score.iter().all(|&z| z == 0.0));
    }

    #[test]
    fn throughput_beats_naive_by_wide_margin() {
        use std::time::Instant;

        let mut seed = 7u64;
        let values: Vec<f64> = (0..10_000).map(|_| lcg(&mut seed) * 50.0).collect();
        let w = 50;

        let start = Instant::now();
        compute_window_metrics(&values, w).unwrap();
        let fast_elapsed = start.elapsed();

        let start = Instant::now();
        naive_reference(&values, w);
        let slow_elapsed = start.elapsed();

        assert!(
            slow_elapsed >= fast_elapsed * 10,
            "expected the naive path to be meaningfully slower (fast={fast_elapsed:?}, slow={slow_elapsed:?})"
        );
    }
}
