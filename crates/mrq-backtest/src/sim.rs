use chrono::{DateTime, Utc};

use mrq_core::error::{Error, Result};
use mrq_core::types::{Candle, ExitReason, ParameterSet, Rating, Trade, WindowMetrics};
use mrq_kernel::STD_EPSILON;

const TRADING_SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;
const PERIODS_PER_YEAR: f64 = 365.0;

/// Capital and execution assumptions held fixed across a single simulation run.
/// Defaults assume a single-instrument, single-position
/// simulation with no fees unless configured.
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    pub initial_capital: f64,
    pub fee_fraction: f64,
    pub quantity_step: f64,
    pub min_notional: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            initial_capital: 10_000.0,
            fee_fraction: 0.0,
            quantity_step: 0.0001,
            min_notional: 10.0,
        }
    }
}

struct OpenPosition {
    entry_index: usize,
    entry_time: DateTime<Utc>,
    entry_price: f64,
    quantity: f64,
    entry_fee: f64,
}

/// Simulates the mean-reversion strategy over one `(symbol, [start, end),
/// params)` invocation and returns its window metrics and completed trades.
///
/// `candles` and `ratings` must each be ordered ascending by timestamp.
/// `window_start`/`window_end` bound the invocation for the annualization
/// calculation and need not equal the first/last candle exactly.
pub fn simulate(
    candles: &[Candle],
    ratings: &[Rating],
    params: &ParameterSet,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    cfg: &SimConfig,
) -> Result<(WindowMetrics, Vec<Trade>)> {
    if candles.len() < 2 {
        return Err(Error::InsufficientData(format!(
            "need at least 2 candles in window, got {}",
            candles.len()
        )));
    }
    let w = params.ma_period;
    if ratings.len() < w {
        return Err(Error::InsufficientData(format!(
            "need at least {w} ratings for ma_period, got {}",
            ratings.len()
        )));
    }

    let rating_values: Vec<f64> = ratings.iter().map(|r| r.rating).collect();
    let series = mrq_kernel::compute_window_metrics(&rating_values, w)?;

    // series.z_score[k] is right-aligned to ratings[k + w - 1].
    let z_signal: Vec<(DateTime<Utc>, f64)> = series
        .z_score
        .iter()
        .enumerate()
        .map(|(k, z)| (ratings[k + w - 1].timestamp, *z))
        .collect();

    let mut cash = cfg.initial_capital;
    let mut position: Option<OpenPosition> = None;
    let mut trades: Vec<Trade> = Vec::new();
    let mut equity_curve: Vec<(DateTime<Utc>, f64)> = Vec::with_capacity(candles.len());
    let mut z_idx = 0usize;

    for (ci, candle) in candles.iter().enumerate() {
        if !candle.close.is_finite() || !candle.high.is_finite() || !candle.low.is_finite() {
            return Err(Error::InvalidInput(format!(
                "non-finite price in candle at {}",
                candle.open_time
            )));
        }

        while z_idx + 1 < z_signal.len() && z_signal[z_idx + 1].0 <= candle.open_time {
            z_idx += 1;
        }
        let current_z = if z_signal.is_empty() || z_signal[z_idx].0 > candle.open_time {
            None
        } else {
            Some(z_signal[z_idx].1)
        };

        let is_last_candle = ci == candles.len() - 1;

        if let Some(pos) = &position {
            if ci > pos.entry_index {
                let stop_price = pos.entry_price * (1.0 - params.stop_loss_pct / 100.0);
                let profit_price = pos.entry_price * (1.0 + params.profit_pct / 100.0);
                let hit_stop = candle.low <= stop_price;
                let hit_profit = candle.high >= profit_price;

                // StopLoss wins when both trigger within the same candle
                // (conservative, worst-case intrabar ordering).
                let exit = if hit_stop {
                    Some((stop_price, ExitReason::StopLoss))
                } else if hit_profit {
                    Some((profit_price, ExitReason::TakeProfit))
                } else if is_last_candle {
                    Some((candle.close, ExitReason::WindowEnd))
                } else {
                    None
                };

                if let Some((exit_price, reason)) = exit {
                    let pos = position.take().expect("checked Some above");
                    let (trade, proceeds) = close_position(&pos, candle.close_time, exit_price, reason, cfg.fee_fraction);
                    cash += proceeds;
                    trades.push(trade);
                }
            }
        }

        if position.is_none() && !is_last_candle {
            if let Some(z) = current_z {
                if z <= -params.z_score_threshold {
                    let entry_price = candle.close;
                    if entry_price.is_finite() && entry_price > 0.0 {
                        let raw_qty = cash / entry_price;
                        let steps = (raw_qty / cfg.quantity_step).floor();
                        let quantity = steps * cfg.quantity_step;
                        let notional = quantity * entry_price;
                        if quantity > 0.0 && notional >= cfg.min_notional && notional <= cash {
                            let fee = notional * cfg.fee_fraction;
                            cash -= notional + fee;
                            position = Some(OpenPosition {
                                entry_index: ci,
                                entry_time: candle.open_time,
                                entry_price,
                                quantity,
                                entry_fee: fee,
                            });
                        }
                    }
                }
            }
        }

        let position_value = position.as_ref().map(|p| p.quantity * candle.close).unwrap_or(0.0);
        equity_curve.push((candle.close_time, cash + position_value));
    }

    // Unreachable in practice: the last-candle exit branch above always
    // closes an open position. Kept as a safety net against future changes
    // to the loop above.
    if let Some(pos) = position.take() {
        let last = candles.last().expect("checked len >= 2 above");
        let (trade, proceeds) = close_position(&pos, last.close_time, last.close, ExitReason::WindowEnd, cfg.fee_fraction);
        cash += proceeds;
        trades.push(trade);
        if let Some(last_point) = equity_curve.last_mut() {
            last_point.1 = cash;
        }
    }

    let metrics = summarize(candles, &trades, &equity_curve, window_start, window_end, cfg.initial_capital, cash);
    Ok((metrics, trades))
}

fn close_position(
    pos: &OpenPosition,
    close_time: DateTime<Utc>,
    exit_price: f64,
    reason: ExitReason,
    fee_fraction: f64,
) -> (Trade, f64) {
    let gross_proceeds = pos.quantity * exit_price;
    let exit_fee = gross_proceeds * fee_fraction;
    let net_proceeds = gross_proceeds - exit_fee;
    let cost_basis = pos.quantity * pos.entry_price + pos.entry_fee;
    let pnl = net_proceeds - cost_basis;
    let pnl_pct = exit_price / pos.entry_price - 1.0;

    let trade = Trade {
        run_id: None,
        open_time: pos.entry_time,
        close_time,
        entry_price: pos.entry_price,
        exit_price,
        quantity: pos.quantity,
        exit_reason: reason,
        pnl,
        pnl_pct,
    };
    (trade, net_proceeds)
}

fn summarize(
    candles: &[Candle],
    trades: &[Trade],
    equity_curve: &[(DateTime<Utc>, f64)],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    initial_capital: f64,
    final_equity: f64,
) -> WindowMetrics {
    let total_return = final_equity / initial_capital - 1.0;
    let elapsed_seconds = (window_end - window_start).num_seconds().max(1) as f64;
    let annualized_return = (1.0 + total_return).powf(TRADING_SECONDS_PER_YEAR / elapsed_seconds) - 1.0;

    let close_first = candles.first().expect("checked non-empty above").close;
    let close_last = candles.last().expect("checked non-empty above").close;
    let benchmark_return = close_last / close_first - 1.0;
    let annualized_benchmark = (1.0 + benchmark_return).powf(TRADING_SECONDS_PER_YEAR / elapsed_seconds) - 1.0;
    let alpha = annualized_return - annualized_benchmark;

    let daily = resample_daily(equity_curve);
    let period_returns: Vec<f64> = daily.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
    let (sharpe, sortino) = risk_ratios(&period_returns);

    let max_drawdown = max_drawdown(equity_curve);

    let total_trades = trades.len();
    let winning = trades.iter().filter(|t| t.pnl > 0.0).count();
    let win_ratio = if total_trades > 0 { winning as f64 / total_trades as f64 } else { 0.0 };

    let gains: f64 = trades.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).sum();
    let losses: f64 = trades.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl.abs()).sum();
    let profit_factor = if losses > 0.0 {
        gains / losses
    } else if gains > 0.0 {
        1.0e6
    } else {
        0.0
    };

    let avg_trade_duration_hours = if total_trades > 0 {
        trades
            .iter()
            .map(|t| (t.close_time - t.open_time).num_seconds() as f64 / 3600.0)
            .sum::<f64>()
            / total_trades as f64
    } else {
        0.0
    };

    WindowMetrics {
        total_return,
        annualized_return,
        benchmark_return,
        alpha,
        sharpe,
        sortino,
        max_drawdown,
        win_ratio,
        total_trades,
        profit_factor,
        avg_trade_duration_hours,
        consistency: if total_return > 0.0 { 1.0 } else { 0.0 },
    }
}

fn resample_daily(equity_curve: &[(DateTime<Utc>, f64)]) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::new();
    let mut last_day: Option<chrono::NaiveDate> = None;
    for (ts, eq) in equity_curve {
        let day = ts.date_naive();
        if Some(day) != last_day {
            out.push(*eq);
            last_day = Some(day);
        } else if let Some(last) = out.last_mut() {
            *last = *eq;
        }
    }
    out
}

fn risk_ratios(period_returns: &[f64]) -> (f64, f64) {
    if period_returns.len() < 2 {
        return (0.0, 0.0);
    }
    let n = period_returns.len() as f64;
    let mean = period_returns.iter().sum::<f64>() / n;
    let variance = period_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let sharpe = if std < STD_EPSILON { 0.0 } else { mean / std * PERIODS_PER_YEAR.sqrt() };

    let downside: Vec<f64> = period_returns.iter().filter(|r| **r < 0.0).map(|r| r.powi(2)).collect();
    let sortino = if downside.is_empty() {
        0.0
    } else {
        let downside_dev = (downside.iter().sum::<f64>() / downside.len() as f64).sqrt();
        if downside_dev < STD_EPSILON {
            0.0
        } else {
            mean / downside_dev * PERIODS_PER_YEAR.sqrt()
        }
    };

    (sharpe, sortino)
}

fn max_drawdown(equity_curve: &[(DateTime<Utc>, f64)]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0f64;
    for (_, eq) in equity_curve {
        if *eq > peak {
            peak = *eq;
        }
        if peak > 0.0 {
            let dd = (peak - eq) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candle(t: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            symbol: "BTCUSDT".into(),
            open_time: t,
            close_time: t + Duration::minutes(5),
            open,
            high,
            low,
            close,
            volume: 1.0,
            quote_volume: close,
            trade_count: 1,
            taker_buy_base: 0.5,
            taker_buy_quote: 0.5 * close,
        }
    }

    fn rating(t: DateTime<Utc>, value: f64) -> Rating {
        Rating { symbol: "BTCUSDT".into(), timestamp: t, rating: value, rating_deviation: 1.0, volatility: 0.01, performance_score: 0.0 }
    }

    fn params() -> ParameterSet {
        ParameterSet { z_score_threshold: 2.0, ma_period: 5, profit_pct: 5.0, stop_loss_pct: 2.5 }
    }

    #[test]
    fn flat_series_never_enters_a_trade() {
        let t0 = Utc::now();
        let candles: Vec<Candle> = (0..20).map(|i| candle(t0 + Duration::minutes(5 * i), 100.0, 100.5, 99.5, 100.0)).collect();
        let ratings: Vec<Rating> = (0..20).map(|i| rating(t0 + Duration::minutes(5 * i), 50.0)).collect();

        let (metrics, trades) = simulate(&candles, &ratings, &params(), t0, t0 + Duration::minutes(100), &SimConfig::default()).unwrap();
        assert!(trades.is_empty());
        assert_eq!(metrics.total_trades, 0);
        assert!((metrics.total_return).abs() < 1e-9);
    }

    #[test]
    fn take_profit_closes_a_winning_trade() {
        let t0 = Utc::now();
        let mut ratings = Vec::new();
        let mut candles = Vec::new();
        for i in 0..6 {
            let t = t0 + Duration::minutes(5 * i);
            ratings.push(rating(t, 50.0));
            candles.push(candle(t, 100.0, 100.5, 99.5, 100.0));
        }
        // drive z deeply negative on the 7th rating to trigger entry
        let entry_t = t0 + Duration::minutes(5 * 6);
        ratings.push(rating(entry_t, 1.0));
        candles.push(candle(entry_t, 100.0, 100.5, 99.5, 100.0));

        // next candle spikes through the take-profit level
        let tp_t = entry_t + Duration::minutes(5);
        candles.push(candle(tp_t, 100.0, 110.0, 99.0, 105.0));
        ratings.push(rating(tp_t, 50.0));

        let (metrics, trades) = simulate(&candles, &ratings, &params(), t0, tp_t + Duration::minutes(5), &SimConfig::default()).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].exit_reason, ExitReason::TakeProfit);
        assert!(trades[0].pnl > 0.0);
        assert_eq!(metrics.win_ratio, 1.0);
    }

    #[test]
    fn stop_loss_wins_when_both_trigger_in_the_same_candle() {
        let t0 = Utc::now();
        let mut ratings = Vec::new();
        let mut candles = Vec::new();
        for i in 0..6 {
            let t = t0 + Duration::minutes(5 * i);
            ratings.push(rating(t, 50.0));
            candles.push(candle(t, 100.0, 100.5, 99.5, 100.0));
        }
        let entry_t = t0 + Duration::minutes(5 * 6);
        ratings.push(rating(entry_t, 1.0));
        candles.push(candle(entry_t, 100.0, 100.5, 99.5, 100.0));

        // candle whose high/low straddle BOTH the take-profit and stop-loss levels
        let exit_t = entry_t + Duration::minutes(5);
        candles.push(candle(exit_t, 100.0, 112.0, 95.0, 100.0));
        ratings.push(rating(exit_t, 50.0));

        let (_, trades) = simulate(&candles, &ratings, &params(), t0, exit_t + Duration::minutes(5), &SimConfig::default()).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].exit_reason, ExitReason::StopLoss);
        assert!(trades[0].pnl < 0.0);
    }

    #[test]
    fn insufficient_ratings_is_reported_as_insufficient_data() {
        let t0 = Utc::now();
        let candles = vec![candle(t0, 100.0, 101.0, 99.0, 100.0), candle(t0 + Duration::minutes(5), 100.0, 101.0, 99.0, 100.0)];
        let ratings = vec![rating(t0, 50.0)];
        let err = simulate(&candles, &ratings, &params(), t0, t0 + Duration::minutes(10), &SimConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InsufficientData(_)));
    }
}
