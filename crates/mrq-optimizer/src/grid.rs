use std::collections::HashMap;

use mrq_core::config::OptimizerRanges;
use mrq_core::types::ParameterSet;

/// Enumerates the Cartesian product of the four configured ranges, at each
/// range's step granularity. `ma_period` is rounded to the nearest whole
/// step and floored at 1.
pub fn generate_grid(ranges: &OptimizerRanges) -> Vec<ParameterSet> {
    let z = steps(ranges.z.min, ranges.z.max, ranges.z.step);
    let ma = steps(ranges.ma.min, ranges.ma.max, ranges.ma.step);
    let profit = steps(ranges.profit.min, ranges.profit.max, ranges.profit.step);
    let stop = steps(ranges.stop.min, ranges.stop.max, ranges.stop.step);

    let mut grid = Vec::with_capacity(z.len() * ma.len() * profit.len() * stop.len());
    for &zv in &z {
        for &mv in &ma {
            for &pv in &profit {
                for &sv in &stop {
                    grid.push(ParameterSet {
                        z_score_threshold: zv,
                        ma_period: (mv.round().max(1.0)) as usize,
                        profit_pct: pv,
                        stop_loss_pct: sv,
                    });
                }
            }
        }
    }
    grid
}

/// Dispatch priority: parameters seen more often in
/// `history` (a fingerprint -> request-count map, e.g. built from prior
/// `MetricsStore`/`RunStore` lookups) go first; ties fall back to
/// lexicographic order on the canonical fingerprint for a stable,
/// deterministic dispatch sequence.
pub fn order_by_priority(mut grid: Vec<ParameterSet>, history: &HashMap<String, u64>) -> Vec<ParameterSet> {
    grid.sort_by(|a, b| {
        let ca = history.get(&a.fingerprint()).copied().unwrap_or(0);
        let cb = history.get(&b.fingerprint()).copied().unwrap_or(0);
        cb.cmp(&ca).then_with(|| a.fingerprint().cmp(&b.fingerprint()))
    });
    grid
}

fn steps(min: f64, max: f64, step: f64) -> Vec<f64> {
    if step <= 0.0 || max < min {
        return vec![min];
    }
    let n = ((max - min) / step).floor() as usize;
    (0..=n).map(|i| round2(min + step * i as f64)).collect()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrq_core::config::RangeConfig;

    fn ranges() -> OptimizerRanges {
        OptimizerRanges {
            z: RangeConfig { min: 1.5, max: 2.5, step: 0.5 },
            ma: RangeConfig { min: 2.0, max: 4.0, step: 2.0 },
            profit: RangeConfig { min: 1.0, max: 1.0, step: 0.5 },
            stop: RangeConfig { min: 1.0, max: 1.0, step: 0.5 },
        }
    }

    #[test]
    fn grid_size_is_the_cartesian_product() {
        let grid = generate_grid(&ranges());
        // z: {1.5, 2.0, 2.5} (3), ma: {2, 4} (2), profit: {1.0} (1), stop: {1.0} (1)
        assert_eq!(grid.len(), 3 * 2 * 1 * 1);
    }

    #[test]
    fn grid_entries_are_unique_by_fingerprint() {
        let grid = generate_grid(&ranges());
        let mut seen = std::collections::HashSet::new();
        for p in &grid {
            assert!(seen.insert(p.fingerprint()), "duplicate fingerprint {}", p.fingerprint());
        }
    }

    #[test]
    fn priority_orders_historic_fingerprints_first() {
        let grid = generate_grid(&ranges());
        let favored = grid[grid.len() - 1];
        let mut history = HashMap::new();
        history.insert(favored.fingerprint(), 5u64);

        let ordered = order_by_priority(grid, &history);
        assert_eq!(ordered[0].fingerprint(), favored.fingerprint());
    }

    #[test]
    fn no_history_falls_back_to_lexicographic_fingerprint_order() {
        let grid = generate_grid(&ranges());
        let ordered = order_by_priority(grid, &HashMap::new());
        let mut fingerprints: Vec<String> = ordered.iter().map(|p| p.fingerprint()).collect();
        let mut sorted = fingerprints.clone();
        sorted.sort();
        assert_eq!(fingerprints, sorted);
        fingerprints.dedup();
    }
}
