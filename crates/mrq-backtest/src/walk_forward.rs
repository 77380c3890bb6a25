use chrono::{DateTime, Months, Utc};

use mrq_core::error::{Error, Result};
use mrq_core::traits::{CandleStore, MetricsStore, RatingStore, RunStore, TradeStore};
use mrq_core::types::{AggregateMetrics, BacktestRun, ParameterSet, Trade, WalkForwardWindow, WindowMetrics};

use crate::sim::{self, SimConfig};

/// Splits `[start, end)` into overlapping windows of `window_months`,
/// advancing by `step_months` each time, per the "6-month
/// roll" rule. The last window that no longer fits entirely inside
/// `[start, end)` is dropped rather than truncated.
pub fn split_windows(start: DateTime<Utc>, end: DateTime<Utc>, window_months: u32, step_months: u32) -> Vec<WalkForwardWindow> {
    if window_months == 0 || step_months == 0 {
        return Vec::new();
    }
    let mut windows = Vec::new();
    let mut index = 0usize;
    loop {
        let w_start = match start.checked_add_months(Months::new(step_months * index as u32)) {
            Some(t) => t,
            None => break,
        };
        let w_end = match w_start.checked_add_months(Months::new(window_months)) {
            Some(t) => t,
            None => break,
        };
        if w_end > end {
            break;
        }
        windows.push(WalkForwardWindow { index, start: w_start, end: w_end });
        index += 1;
    }
    windows
}

/// Runs the simulator across every window produced by [`split_windows`]
/// for one `(symbol, params)` pair, aggregates the per-window metrics, and
/// upserts the result into the metrics store. Windows that fail with
/// `InsufficientData` are recorded and skipped; siblings continue.
///
/// Every window's `BacktestRun` and trades are held in memory until the
/// whole walk-forward run has evaluated successfully, then persisted
/// together in one final pass. If this future is aborted mid-run (e.g. a
/// worker-pool timeout), nothing reaches `run_store`/`trade_store` — there
/// is no point at which a partial set of windows is visible in the store.
#[allow(clippy::too_many_arguments)]
pub async fn run_walk_forward(
    candle_store: &dyn CandleStore,
    rating_store: &dyn RatingStore,
    run_store: &dyn RunStore,
    trade_store: &dyn TradeStore,
    metrics_store: &dyn MetricsStore,
    symbol: &str,
    base: &str,
    quote: &str,
    params: &ParameterSet,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    window_months: u32,
    step_months: u32,
    sim_cfg: &SimConfig,
) -> Result<AggregateMetrics> {
    if end <= start {
        return Err(Error::InvalidInput(format!("window end {end} must be after start {start}")));
    }

    let windows = split_windows(start, end, window_months, step_months);
    if windows.is_empty() {
        return Err(Error::InsufficientData(format!(
            "no {window_months}-month window fits in [{start}, {end}) at step {step_months}"
        )));
    }

    let mut window_metrics: Vec<WindowMetrics> = Vec::with_capacity(windows.len());
    let mut staged_runs: Vec<(BacktestRun, Vec<Trade>)> = Vec::with_capacity(windows.len());
    let mut skipped = 0usize;

    for window in &windows {
        let candles = candle_store.query(symbol, window.start, window.end).await?;
        let ratings = rating_store.query(symbol, window.start, window.end).await?;

        match sim::simulate(&candles, &ratings, params, window.start, window.end, sim_cfg) {
            Ok((metrics, trades)) => {
                let run = BacktestRun {
                    id: None,
                    symbol: symbol.to_string(),
                    base: base.to_string(),
                    quote: quote.to_string(),
                    params: *params,
                    start_time: window.start,
                    end_time: window.end,
                    window_size_months: window_months,
                    created_at: None,
                };
                staged_runs.push((run, trades));
                window_metrics.push(metrics);
            }
            Err(Error::InsufficientData(reason)) => {
                tracing::warn!(symbol, window = window.index, reason, "skipping window: insufficient data");
                skipped += 1;
            }
            Err(other) => return Err(other),
        }
    }

    if window_metrics.is_empty() {
        return Err(Error::InsufficientData(format!(
            "all {} windows for {symbol} were skipped for insufficient data",
            windows.len()
        )));
    }
    if skipped > 0 {
        tracing::info!(symbol, skipped, evaluated = window_metrics.len(), "walk-forward run completed with skipped windows");
    }

    let aggregate = aggregate_window_metrics(&window_metrics);

    // Every window simulated successfully; only now do writes start landing
    // in the store, so an abort before this point leaves it untouched.
    for (run, trades) in staged_runs {
        let run_id = run_store.create(&run).await?;
        if !trades.is_empty() {
            let trades: Vec<_> = trades.into_iter().map(|mut t| {
                t.run_id = Some(run_id);
                t
            }).collect();
            trade_store.insert_many(&trades).await?;
        }
    }

    let representative_run = BacktestRun {
        id: None,
        symbol: symbol.to_string(),
        base: base.to_string(),
        quote: quote.to_string(),
        params: *params,
        start_time: start,
        end_time: end,
        window_size_months: window_months,
        created_at: None,
    };
    metrics_store.upsert(params, &representative_run, &aggregate).await?;

    Ok(aggregate)
}

fn aggregate_window_metrics(results: &[WindowMetrics]) -> AggregateMetrics {
    let total_returns: Vec<f64> = results.iter().map(|m| m.total_return).collect();
    let average_return_per_window = mean(&total_returns);
    let std_return_per_window = std_dev(&total_returns, average_return_per_window);
    let positive_window_ratio = mean(&results.iter().map(|m| m.consistency).collect::<Vec<_>>());

    let mean_metrics = WindowMetrics {
        total_return: average_return_per_window,
        annualized_return: mean_field(results, |m| m.annualized_return),
        benchmark_return: mean_field(results, |m| m.benchmark_return),
        alpha: mean_field(results, |m| m.alpha),
        sharpe: mean_field(results, |m| m.sharpe),
        sortino: mean_field(results, |m| m.sortino),
        max_drawdown: mean_field(results, |m| m.max_drawdown),
        win_ratio: mean_field(results, |m| m.win_ratio),
        total_trades: mean_field(results, |m| m.total_trades as f64).round() as usize,
        profit_factor: mean_field(results, |m| m.profit_factor),
        avg_trade_duration_hours: mean_field(results, |m| m.avg_trade_duration_hours),
        consistency: positive_window_ratio,
    };

    let std_metrics = WindowMetrics {
        total_return: std_return_per_window,
        annualized_return: std_field(results, |m| m.annualized_return),
        benchmark_return: std_field(results, |m| m.benchmark_return),
        alpha: std_field(results, |m| m.alpha),
        sharpe: std_field(results, |m| m.sharpe),
        sortino: std_field(results, |m| m.sortino),
        max_drawdown: std_field(results, |m| m.max_drawdown),
        win_ratio: std_field(results, |m| m.win_ratio),
        total_trades: std_field(results, |m| m.total_trades as f64).round() as usize,
        profit_factor: std_field(results, |m| m.profit_factor),
        avg_trade_duration_hours: std_field(results, |m| m.avg_trade_duration_hours),
        consistency: std_field(results, |m| m.consistency),
    };

    AggregateMetrics {
        average_return_per_window,
        std_return_per_window,
        positive_window_ratio,
        mean: mean_metrics,
        std_dev: std_metrics,
    }
}

fn mean_field(results: &[WindowMetrics], f: impl Fn(&WindowMetrics) -> f64) -> f64 {
    mean(&results.iter().map(f).collect::<Vec<_>>())
}

fn std_field(results: &[WindowMetrics], f: impl Fn(&WindowMetrics) -> f64) -> f64 {
    let values: Vec<f64> = results.iter().map(f).collect();
    std_dev(&values, mean(&values))
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64], mean: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn windows_roll_forward_by_step_and_drop_the_partial_tail() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap();
        let windows = split_windows(start, end, 6, 3);

        // [Jan,Jul), [Apr,Oct) both fit; [Jul,Jan-next) does not.
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].start, start);
        assert_eq!(windows[1].start, Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn zero_step_yields_no_windows() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap();
        assert!(split_windows(start, end, 6, 0).is_empty());
    }

    #[test]
    fn aggregate_reflects_mean_and_positive_ratio() {
        let mut a = WindowMetrics::default();
        a.total_return = 0.1;
        a.consistency = 1.0;
        let mut b = WindowMetrics::default();
        b.total_return = -0.05;
        b.consistency = 0.0;

        let agg = aggregate_window_metrics(&[a, b]);
        assert!((agg.average_return_per_window - 0.025).abs() < 1e-9);
        assert!((agg.positive_window_ratio - 0.5).abs() < 1e-9);
    }
}
