use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A fixed-interval OHLCV bar for a symbol. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: i64,
    pub taker_buy_base: f64,
    pub taker_buy_quote: f64,
}

impl Candle {
    pub fn is_well_formed(&self) -> bool {
        self.open_time < self.close_time
    }
}

/// A per-asset Glicko-style skill score at a point in time, opaque beyond
/// its numeric fields — produced upstream of this engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub rating: f64,
    pub rating_deviation: f64,
    pub volatility: f64,
    pub performance_score: f64,
}

impl Rating {
    pub fn is_well_formed(&self) -> bool {
        self.rating >= 0.0 && self.volatility >= 0.0
    }
}

/// The four tunables of the mean-reversion strategy. A value type: equality
/// is exact on all four fields, never approximate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub z_score_threshold: f64,
    pub ma_period: usize,
    pub profit_pct: f64,
    pub stop_loss_pct: f64,
}

impl ParameterSet {
    /// Canonical, lossless fixed-decimal fingerprint used as a dedupe key.
    pub fn fingerprint(&self) -> String {
        format!(
            "{:08.2}-{:06}-{:08.2}-{:08.2}",
            self.z_score_threshold, self.ma_period, self.profit_pct, self.stop_loss_pct
        )
    }
}

impl Eq for ParameterSet {}

impl std::hash::Hash for ParameterSet {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.fingerprint().hash(state);
    }
}

/// One (params, window) backtest invocation, owned by the walk-forward driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRun {
    pub id: Option<i64>,
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub params: ParameterSet,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub window_size_months: u32,
    pub created_at: Option<DateTime<Utc>>,
}

/// Why a trade's position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    WindowEnd,
}

/// A completed round-trip trade produced by the backtest simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub run_id: Option<i64>,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub entry_price: f64,
    pub exit_price: f64,
    pub quantity: f64,
    pub exit_reason: ExitReason,
    pub pnl: f64,
    pub pnl_pct: f64,
}

impl Trade {
    pub fn is_well_formed(&self) -> bool {
        self.close_time >= self.open_time
    }
}

/// Per-window performance metrics for one (symbol, params, window) backtest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub benchmark_return: f64,
    pub alpha: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub win_ratio: f64,
    pub total_trades: usize,
    pub profit_factor: f64,
    pub avg_trade_duration_hours: f64,
    pub consistency: f64,
}

/// Mean and standard deviation of each `WindowMetrics` field, aggregated
/// across all windows evaluated for one parameter set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub average_return_per_window: f64,
    pub std_return_per_window: f64,
    pub positive_window_ratio: f64,
    pub mean: WindowMetrics,
    pub std_dev: WindowMetrics,
}

/// Resumability state for a chunked, long-running task (ingest or optimizer
/// dispatch). Persisted atomically after every completed unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressState {
    pub task_key: String,
    pub completed_chunks: u64,
    pub total_chunks: u64,
    pub last_completed_time: Option<DateTime<Utc>>,
    pub cumulative_records: u64,
    pub started_at: DateTime<Utc>,
}

impl ProgressState {
    pub fn new(task_key: impl Into<String>, total_chunks: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            task_key: task_key.into(),
            completed_chunks: 0,
            total_chunks,
            last_completed_time: None,
            cumulative_records: 0,
            started_at,
        }
    }
}

/// The outcome of one scheduled (symbol, params) walk-forward invocation as
/// seen by the optimizer scheduler. Replaces the dynamic, loosely-typed
/// result maps of the reference system with a closed variant. Carries the
/// walk-forward driver's aggregate across its windows rather than a single
/// window's metrics/trades — those are already persisted by the driver via
/// `RunStore`/`TradeStore` by the time a scheduler task completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BacktestOutcome {
    Success { metrics: AggregateMetrics },
    InsufficientData,
    Timeout,
    Failed { reason: String },
}

/// One `[start, end)` slice produced by the walk-forward window splitter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WalkForwardWindow {
    pub index: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The optimizer's search strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerMode {
    Grid,
    Eda,
}

/// The objective an optimizer run ranks candidates by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    Alpha,
    Sharpe,
    AnnualizedReturn,
}

impl Objective {
    pub fn extract(&self, metrics: &AggregateMetrics) -> f64 {
        match self {
            Objective::Alpha => metrics.mean.alpha,
            Objective::Sharpe => metrics.mean.sharpe,
            Objective::AnnualizedReturn => metrics.mean.annualized_return,
        }
    }
}

/// Trading-status artifact consumed by an external live-execution engine,
/// not read by any component in this crate. The core only ever writes
/// `status = Stopping` on shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingStatus {
    pub status: TradingStatusKind,
    pub pid: u32,
    pub start_time: DateTime<Utc>,
    pub is_paper: bool,
    pub parameter_sets: Vec<ParameterSet>,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingStatusKind {
    Running,
    Stopping,
    Stopped,
}
