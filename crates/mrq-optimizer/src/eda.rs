//! Two-phase Estimation of Distribution Algorithm:
//! sample uniformly, evaluate, keep the top survivors, fit an independent
//! Gaussian per dimension around them, and resample near that fit.

use rand::Rng;

use mrq_core::config::{OptimizerRanges, RangeConfig};
use mrq_core::types::ParameterSet;

/// Per-dimension std floors — prevent
/// degenerate exploration when phase-1 survivors cluster tightly on one
/// dimension.
pub const STD_FLOOR_Z: f64 = 0.5;
pub const STD_FLOOR_MA: f64 = 5.0;
pub const STD_FLOOR_PROFIT: f64 = 1.0;
pub const STD_FLOOR_STOP: f64 = 0.5;

/// k = max(3, ceil(0.2 * n1)) survivors advance to phase 2.
pub fn survivor_count(n1: usize) -> usize {
    (0.2 * n1 as f64).ceil().max(3.0) as usize
}

/// Phase 1: `n` parameter sets drawn uniformly from the configured ranges,
/// snapped to each dimension's step granularity.
pub fn sample_phase1(ranges: &OptimizerRanges, n: usize, rng: &mut impl Rng) -> Vec<ParameterSet> {
    (0..n)
        .map(|_| ParameterSet {
            z_score_threshold: snap(uniform(rng, ranges.z.min, ranges.z.max), ranges.z),
            ma_period: snap(uniform(rng, ranges.ma.min, ranges.ma.max), ranges.ma).round().max(1.0) as usize,
            profit_pct: snap(uniform(rng, ranges.profit.min, ranges.profit.max), ranges.profit),
            stop_loss_pct: snap(uniform(rng, ranges.stop.min, ranges.stop.max), ranges.stop),
        })
        .collect()
}

/// Per-dimension (mean, std) fit over the phase-1 survivors, std floored.
#[derive(Debug, Clone, Copy)]
pub struct DimFit {
    pub mean: f64,
    pub std: f64,
}

fn fit_dim(values: &[f64], floor: f64) -> DimFit {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    DimFit { mean, std: variance.sqrt().max(floor) }
}

/// Phase 2: `n` new samples drawn from an independent Gaussian per
/// dimension fit to `survivors`, clamped to the configured range and
/// snapped to its step.
pub fn sample_phase2(survivors: &[ParameterSet], ranges: &OptimizerRanges, n: usize, rng: &mut impl Rng) -> Vec<ParameterSet> {
    let z_fit = fit_dim(&survivors.iter().map(|p| p.z_score_threshold).collect::<Vec<_>>(), STD_FLOOR_Z);
    let ma_fit = fit_dim(&survivors.iter().map(|p| p.ma_period as f64).collect::<Vec<_>>(), STD_FLOOR_MA);
    let profit_fit = fit_dim(&survivors.iter().map(|p| p.profit_pct).collect::<Vec<_>>(), STD_FLOOR_PROFIT);
    let stop_fit = fit_dim(&survivors.iter().map(|p| p.stop_loss_pct).collect::<Vec<_>>(), STD_FLOOR_STOP);

    (0..n)
        .map(|_| ParameterSet {
            z_score_threshold: clamp_snap(gaussian(rng, z_fit.mean, z_fit.std), ranges.z),
            ma_period: clamp_snap(gaussian(rng, ma_fit.mean, ma_fit.std), ranges.ma).round().max(1.0) as usize,
            profit_pct: clamp_snap(gaussian(rng, profit_fit.mean, profit_fit.std), ranges.profit),
            stop_loss_pct: clamp_snap(gaussian(rng, stop_fit.mean, stop_fit.std), ranges.stop),
        })
        .collect()
}

fn uniform(rng: &mut impl Rng, min: f64, max: f64) -> f64 {
    if max <= min {
        return min;
    }
    rng.gen_range(min..=max)
}

/// Box-Muller transform: one standard normal draw, scaled to `(mean, std)`.
fn gaussian(rng: &mut impl Rng, mean: f64, std: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std * z0
}

fn snap(value: f64, r: RangeConfig) -> f64 {
    if r.step <= 0.0 {
        return value;
    }
    r.min + ((value - r.min) / r.step).round() * r.step
}

fn clamp_snap(value: f64, r: RangeConfig) -> f64 {
    snap(value.clamp(r.min, r.max), r).clamp(r.min, r.max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mrq_core::config::OptimizerRanges;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ranges() -> OptimizerRanges {
        OptimizerRanges::default()
    }

    #[test]
    fn survivor_count_follows_ceil_of_20_percent_floored_at_3() {
        assert_eq!(survivor_count(20), 4); // max(3, ceil(4.0)) = 4
        assert_eq!(survivor_count(5), 3); // max(3, ceil(1.0)) = 3
        assert_eq!(survivor_count(3), 3); // max(3, ceil(0.6)) = 3
    }

    #[test]
    fn phase1_samples_stay_within_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let samples = sample_phase1(&ranges(), 50, &mut rng);
        for p in &samples {
            assert!(p.z_score_threshold >= ranges().z.min - 1e-9 && p.z_score_threshold <= ranges().z.max + 1e-9);
            assert!(p.ma_period >= 1);
            assert!(p.profit_pct >= ranges().profit.min - 1e-9 && p.profit_pct <= ranges().profit.max + 1e-9);
        }
    }

    #[test]
    fn phase2_clusters_around_survivor_mean_but_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let survivors = vec![
            ParameterSet { z_score_threshold: 2.0, ma_period: 10, profit_pct: 5.0, stop_loss_pct: 2.0 },
            ParameterSet { z_score_threshold: 2.1, ma_period: 10, profit_pct: 5.2, stop_loss_pct: 2.1 },
            ParameterSet { z_score_threshold: 1.9, ma_period: 8, profit_pct: 4.8, stop_loss_pct: 1.9 },
        ];
        let samples = sample_phase2(&survivors, &ranges(), 30, &mut rng);
        assert_eq!(samples.len(), 30);
        for p in &samples {
            let r = ranges();
            assert!(p.z_score_threshold >= r.z.min - 1e-9 && p.z_score_threshold <= r.z.max + 1e-9);
            assert!(p.ma_period >= 1);
            assert!(p.stop_loss_pct >= r.stop.min - 1e-9 && p.stop_loss_pct <= r.stop.max + 1e-9);
        }
    }

    #[test]
    fn degenerate_survivors_still_produce_a_floored_std() {
        let mut rng = StdRng::seed_from_u64(3);
        // all identical -> raw std = 0, floor must keep exploration alive
        let survivors = vec![ParameterSet { z_score_threshold: 2.0, ma_period: 10, profit_pct: 5.0, stop_loss_pct: 2.0 }; 5];
        let samples = sample_phase2(&survivors, &ranges(), 20, &mut rng);
        let distinct = samples.iter().map(|p| p.fingerprint()).collect::<std::collections::HashSet<_>>();
        assert!(distinct.len() > 1, "expected spread from the floored std, got a single point");
    }
}
