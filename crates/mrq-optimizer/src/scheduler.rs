//! The optimizer scheduler: turns a configured search space into a
//! stream of walk-forward backtests dispatched across a [`WorkerPool`],
//! deduplicated against prior results, tracked on a [`Dashboard`], and
//! finally ranked and summarized for the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;

use mrq_backtest::{run_walk_forward, SimConfig};
use mrq_core::config::OptimizerRanges;
use mrq_core::error::{Error, Result};
use mrq_core::traits::{CandleStore, MetricsStore, RatingStore, RunStore, TradeStore};
use mrq_core::types::{AggregateMetrics, BacktestOutcome, Objective, ParameterSet};

use crate::dashboard::Dashboard;
use crate::eda;
use crate::grid;
use crate::pool::{spawn_sigint_watcher, PoolConfig, PoolOutcome, TaskOutput, WorkerPool};

/// The trait-object store bundle a scheduler run is wired against. Held as
/// `Arc` so every spawned task can clone its own handle cheaply.
pub struct Stores {
    pub candle: Arc<dyn CandleStore>,
    pub rating: Arc<dyn RatingStore>,
    pub run: Arc<dyn RunStore>,
    pub trade: Arc<dyn TradeStore>,
    pub metrics: Arc<dyn MetricsStore>,
}

/// Everything an `optimize` invocation needs, independent of grid vs. EDA.
pub struct OptimizeRequest {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub window_months: u32,
    pub step_months: u32,
    pub sim_cfg: SimConfig,
    pub objective: Objective,
    pub ranges: OptimizerRanges,
    pub pool: PoolConfig,
    /// Re-evaluate parameter sets the metrics store already has a result for.
    pub force: bool,
    /// Seeds the EDA sampler's RNG for a reproducible run. Ignored in grid
    /// mode. `None` draws from OS entropy.
    pub eda_seed: Option<u64>,
}

/// One finished, ranked candidate.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub params: ParameterSet,
    pub metrics: AggregateMetrics,
    pub objective_value: f64,
}

/// A group of failures sharing a parameter dimension and a recurring reason.
#[derive(Debug, Clone)]
pub struct FailureGroup {
    pub dimension: String,
    pub reason: String,
    pub count: u64,
}

/// The full output of one scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerReport {
    pub ranked: Vec<RankedResult>,
    pub failures: Vec<FailureGroup>,
    pub dispatched: u64,
    pub skipped_duplicates: u64,
}

/// Runs grid-search mode end to end: enumerate, prioritize, dedup, dispatch,
/// rank.
pub async fn run_grid(req: &OptimizeRequest, stores: &Stores) -> Result<SchedulerReport> {
    let candidates = grid::generate_grid(&req.ranges);
    let history = build_history(stores.run.as_ref(), &candidates, &req.base, &req.quote).await;
    let ordered = grid::order_by_priority(candidates, &history);
    run_candidates(req, stores, ordered).await
}

/// Runs EDA mode end to end: phase-1 uniform sample, evaluate, keep
/// survivors, phase-2 Gaussian resample, evaluate, rank the union.
pub async fn run_eda(req: &OptimizeRequest, stores: &Stores, phase1_samples: usize, phase2_samples: usize) -> Result<SchedulerReport> {
    let mut rng = match req.eda_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let phase1 = eda::sample_phase1(&req.ranges, phase1_samples, &mut rng);
    let phase1_report = run_candidates(req, stores, phase1).await?;

    let mut ranked_by_fp: HashMap<String, &RankedResult> =
        phase1_report.ranked.iter().map(|r| (r.params.fingerprint(), r)).collect();

    let k = eda::survivor_count(phase1_samples);
    let mut survivors: Vec<&RankedResult> = phase1_report.ranked.iter().collect();
    survivors.sort_by(|a, b| b.objective_value.partial_cmp(&a.objective_value).unwrap_or(std::cmp::Ordering::Equal));
    survivors.truncate(k);

    if survivors.is_empty() {
        return Ok(phase1_report);
    }

    let survivor_params: Vec<ParameterSet> = survivors.iter().map(|r| r.params).collect();
    let phase2 = eda::sample_phase2(&survivor_params, &req.ranges, phase2_samples, &mut rng);
    let phase2_report = run_candidates(req, stores, phase2).await?;

    for r in &phase2_report.ranked {
        ranked_by_fp.insert(r.params.fingerprint(), r);
    }

    let mut ranked: Vec<RankedResult> = ranked_by_fp.into_values().cloned().collect();
    ranked.sort_by(|a, b| b.objective_value.partial_cmp(&a.objective_value).unwrap_or(std::cmp::Ordering::Equal));

    let mut failures = phase1_report.failures;
    failures.extend(phase2_report.failures);
    failures = merge_failure_groups(failures);

    Ok(SchedulerReport {
        ranked,
        failures,
        dispatched: phase1_report.dispatched + phase2_report.dispatched,
        skipped_duplicates: phase1_report.skipped_duplicates + phase2_report.skipped_duplicates,
    })
}

/// Dispatches `candidates` across the worker pool, honoring dedup against
/// `stores.metrics` (unless `req.force`), and returns the ranked survivors
/// plus grouped failures.
async fn run_candidates(req: &OptimizeRequest, stores: &Stores, candidates: Vec<ParameterSet>) -> Result<SchedulerReport> {
    let mut to_run = Vec::with_capacity(candidates.len());
    let mut skipped = 0u64;
    for params in candidates {
        if !req.force && stores.metrics.has_result(&params.fingerprint()).await? {
            skipped += 1;
            continue;
        }
        to_run.push(params);
    }

    let pool = Arc::new(WorkerPool::new(PoolConfig {
        slots: req.pool.slots,
        task_timeout: req.pool.task_timeout,
        max_retries: req.pool.max_retries,
        shutdown_grace: req.pool.shutdown_grace,
    }));
    let dashboard = Arc::new(Dashboard::new(to_run.len() as u64, pool.slots()));
    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let sigint_handle = spawn_sigint_watcher(shutdown_flag.clone());

    let ticker_dashboard = dashboard.clone();
    let ticker_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;
            ticker_dashboard.log_tick();
        }
    });

    let mut handles = Vec::with_capacity(to_run.len());
    for (slot, params) in to_run.into_iter().enumerate() {
        let pool = pool.clone();
        let dashboard = dashboard.clone();
        let shutdown_flag = shutdown_flag.clone();
        let candle = stores.candle.clone();
        let rating = stores.rating.clone();
        let run = stores.run.clone();
        let trade = stores.trade.clone();
        let metrics = stores.metrics.clone();
        let symbol = req.symbol.clone();
        let base = req.base.clone();
        let quote = req.quote.clone();
        let start = req.start;
        let end = req.end;
        let window_months = req.window_months;
        let step_months = req.step_months;
        let sim_cfg = req.sim_cfg;
        let objective = req.objective;
        let slot_idx = slot % pool.slots().max(1);

        handles.push(tokio::spawn(async move {
            if shutdown_flag.load(Ordering::SeqCst) {
                pool.begin_shutdown();
            }
            dashboard.mark_running(slot_idx, params);
            let outcome = pool
                .run(move || {
                    let candle = candle.clone();
                    let rating = rating.clone();
                    let run = run.clone();
                    let trade = trade.clone();
                    let metrics = metrics.clone();
                    let symbol = symbol.clone();
                    let base = base.clone();
                    let quote = quote.clone();
                    Box::pin(async move {
                        let result = run_walk_forward(
                            candle.as_ref(),
                            rating.as_ref(),
                            run.as_ref(),
                            trade.as_ref(),
                            metrics.as_ref(),
                            &symbol,
                            &base,
                            &quote,
                            &params,
                            start,
                            end,
                            window_months,
                            step_months,
                            &sim_cfg,
                        )
                        .await;

                        let backtest_outcome = match result {
                            Ok(agg) => BacktestOutcome::Success { metrics: agg },
                            Err(Error::InsufficientData(_)) => BacktestOutcome::InsufficientData,
                            Err(Error::Timeout(_)) => BacktestOutcome::Timeout,
                            Err(e) => BacktestOutcome::Failed { reason: e.to_string() },
                        };
                        Ok::<TaskOutput, Error>(Box::new(backtest_outcome) as TaskOutput)
                    })
                })
                .await;
            dashboard.mark_idle(slot_idx);

            let classified = match outcome {
                PoolOutcome::Completed(boxed) => *boxed.downcast::<BacktestOutcome>().unwrap_or_else(|_| {
                    Box::new(BacktestOutcome::Failed { reason: "internal: unexpected task output type".into() })
                }),
                PoolOutcome::TimedOut => BacktestOutcome::Timeout,
                PoolOutcome::Cancelled => BacktestOutcome::Failed { reason: "cancelled".into() },
                PoolOutcome::Failed(e) => BacktestOutcome::Failed { reason: e.to_string() },
            };

            match &classified {
                BacktestOutcome::Success { metrics } => {
                    dashboard.record_success(params, objective.extract(metrics));
                }
                BacktestOutcome::InsufficientData => dashboard.record_insufficient_data(),
                BacktestOutcome::Timeout => dashboard.record_timeout(),
                BacktestOutcome::Failed { .. } => dashboard.record_failure(),
            }

            (params, classified)
        }));
    }

    let mut ranked = Vec::new();
    let mut failures = Vec::new();
    for handle in handles {
        let (params, outcome) = handle.await.map_err(|e| Error::PersistenceError(e.to_string()))?;
        match outcome {
            BacktestOutcome::Success { metrics } => {
                let objective_value = req.objective.extract(&metrics);
                ranked.push(RankedResult { params, metrics, objective_value });
            }
            BacktestOutcome::InsufficientData => {
                failures.push(raw_failure(params, "insufficient_data".to_string()));
            }
            BacktestOutcome::Timeout => {
                failures.push(raw_failure(params, "timeout".to_string()));
            }
            BacktestOutcome::Failed { reason } => {
                failures.push(raw_failure(params, reason));
            }
        }
    }

    ticker_handle.abort();
    sigint_handle.abort();

    ranked.sort_by(|a, b| b.objective_value.partial_cmp(&a.objective_value).unwrap_or(std::cmp::Ordering::Equal));
    let dispatched = ranked.len() as u64 + failures.len() as u64;

    Ok(SchedulerReport {
        ranked,
        failures: merge_failure_groups(failures),
        dispatched,
        skipped_duplicates: skipped,
    })
}

fn raw_failure(params: ParameterSet, reason: String) -> FailureGroup {
    // Temporary per-task record; merged by (dimension, reason) below.
    FailureGroup { dimension: dominant_dimension(&params), reason, count: 1 }
}

/// Attributes a failure to the dimension with the most extreme configured
/// value, a simple heuristic used purely for grouping.
fn dominant_dimension(params: &ParameterSet) -> String {
    let mut candidates = vec![
        ("z_score_threshold", params.z_score_threshold),
        ("ma_period", params.ma_period as f64),
        ("profit_pct", params.profit_pct),
        ("stop_loss_pct", params.stop_loss_pct),
    ];
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    candidates[0].0.to_string()
}

fn merge_failure_groups(groups: Vec<FailureGroup>) -> Vec<FailureGroup> {
    let mut by_key: HashMap<(String, String), u64> = HashMap::new();
    for g in groups {
        *by_key.entry((g.dimension, g.reason)).or_insert(0) += g.count;
    }
    let mut merged: Vec<FailureGroup> = by_key
        .into_iter()
        .map(|((dimension, reason), count)| FailureGroup { dimension, reason, count })
        .collect();
    merged.sort_by(|a, b| b.count.cmp(&a.count));
    merged
}

/// Builds a fingerprint -> prior-run-count map from the run store, used to
/// favor previously-requested parameter sets in grid dispatch order.
async fn build_history(run_store: &dyn RunStore, candidates: &[ParameterSet], base: &str, quote: &str) -> HashMap<String, u64> {
    let mut history = HashMap::new();
    for params in candidates {
        if let Ok(runs) = run_store.list_by_params(params, base, quote).await {
            if !runs.is_empty() {
                history.insert(params.fingerprint(), runs.len() as u64);
            }
        }
    }
    history
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mrq_core::types::BacktestRun;
    use std::sync::Mutex;

    fn params(z: f64, ma: usize, profit: f64, stop: f64) -> ParameterSet {
        ParameterSet { z_score_threshold: z, ma_period: ma, profit_pct: profit, stop_loss_pct: stop }
    }

    #[test]
    fn dominant_dimension_picks_the_largest_configured_value() {
        assert_eq!(dominant_dimension(&params(2.0, 50, 5.0, 2.5)), "ma_period");
        assert_eq!(dominant_dimension(&params(2.0, 3, 1.0, 0.5)), "z_score_threshold");
    }

    #[test]
    fn merge_failure_groups_sums_counts_by_dimension_and_reason() {
        let groups = vec![
            raw_failure(params(2.0, 50, 5.0, 2.5), "insufficient_data".to_string()),
            raw_failure(params(2.1, 60, 5.0, 2.5), "insufficient_data".to_string()),
            raw_failure(params(2.0, 50, 5.0, 2.5), "timeout".to_string()),
        ];
        let merged = merge_failure_groups(groups);

        let total: u64 = merged.iter().map(|g| g.count).sum();
        assert_eq!(total, 3);
        // Sorted descending by count; the two "ma_period"/"insufficient_data"
        // failures land in the same bucket and outrank the lone timeout.
        assert_eq!(merged[0].dimension, "ma_period");
        assert_eq!(merged[0].reason, "insufficient_data");
        assert_eq!(merged[0].count, 2);
    }

    struct MockRunStore {
        runs_by_fingerprint: Mutex<HashMap<String, Vec<BacktestRun>>>,
    }

    #[async_trait]
    impl RunStore for MockRunStore {
        async fn create(&self, _run: &BacktestRun) -> Result<i64> {
            unimplemented!("not exercised by build_history")
        }

        async fn list_by_params(&self, params: &ParameterSet, _base: &str, _quote: &str) -> Result<Vec<BacktestRun>> {
            Ok(self
                .runs_by_fingerprint
                .lock()
                .unwrap()
                .get(&params.fingerprint())
                .cloned()
                .unwrap_or_default())
        }
    }

    fn run(params: ParameterSet) -> BacktestRun {
        BacktestRun {
            id: Some(1),
            symbol: "BTCUSDT".into(),
            base: "BTC".into(),
            quote: "USDT".into(),
            params,
            start_time: Utc::now(),
            end_time: Utc::now(),
            window_size_months: 6,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn build_history_counts_prior_runs_and_skips_candidates_with_none() {
        let seen = params(2.0, 50, 5.0, 2.5);
        let unseen = params(3.0, 20, 4.0, 2.0);
        let mut runs_by_fingerprint = HashMap::new();
        runs_by_fingerprint.insert(seen.fingerprint(), vec![run(seen), run(seen)]);
        let store = MockRunStore { runs_by_fingerprint: Mutex::new(runs_by_fingerprint) };

        let history = build_history(&store, &[seen, unseen], "BTC", "USDT").await;
        assert_eq!(history.get(&seen.fingerprint()), Some(&2));
        assert!(!history.contains_key(&unseen.fingerprint()));
    }
}
