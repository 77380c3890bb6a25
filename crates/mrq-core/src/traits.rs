use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{AggregateMetrics, BacktestRun, Candle, ParameterSet, Rating, Trade};

/// Summary of a rating series' coverage for one symbol.
#[derive(Debug, Clone, Copy)]
pub struct RatingSummary {
    pub min_ts: Option<DateTime<Utc>>,
    pub max_ts: Option<DateTime<Utc>>,
    pub count: u64,
}

/// Logical candle store, database-agnostic. Single-writer in the ingest
/// path; read-only in the backtest and walk-forward paths.
#[async_trait]
pub trait CandleStore: Send + Sync {
    async fn insert_many(&self, candles: &[Candle], skip_duplicates: bool) -> Result<u64>;
    async fn query(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Candle>>;
}

/// Logical rating store. Read-only in the backtest path.
#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn query(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Rating>>;
    async fn summarize(&self, symbol: &str) -> Result<RatingSummary>;
}

/// Logical backtest-run store, owned exclusively by the walk-forward driver.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create(&self, run: &BacktestRun) -> Result<i64>;
    async fn list_by_params(&self, params: &ParameterSet, base: &str, quote: &str) -> Result<Vec<BacktestRun>>;
}

/// Logical trade store, owned exclusively by the walk-forward driver (and,
/// through it, the backtest simulator).
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn insert_many(&self, trades: &[Trade]) -> Result<()>;
    async fn query(&self, run_id: i64) -> Result<Vec<Trade>>;
}

/// Filters accepted by `MetricsStore::top_n`.
#[derive(Debug, Clone, Default)]
pub struct MetricsFilter {
    pub symbol: Option<String>,
    pub base: Option<String>,
    pub quote: Option<String>,
}

/// One ranked row returned from `MetricsStore::top_n`.
#[derive(Debug, Clone)]
pub struct RankedMetrics {
    pub params: ParameterSet,
    pub symbol: String,
    pub metrics: AggregateMetrics,
    pub objective_value: f64,
}

/// Logical aggregate-metrics store, owned by the walk-forward driver and
/// consumed by the optimizer scheduler for deduplication and ranking.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn upsert(&self, params: &ParameterSet, window: &BacktestRun, metrics: &AggregateMetrics) -> Result<()>;
    async fn top_n(&self, objective: crate::types::Objective, n: usize, filters: &MetricsFilter) -> Result<Vec<RankedMetrics>>;
    /// Used by the optimizer's dedup pass: does a result already exist for
    /// this fingerprint (absent `--force`)?
    async fn has_result(&self, fingerprint: &str) -> Result<bool>;
}

/// One candle as it arrives over the wire, before it is validated into a
/// [`Candle`](crate::types::Candle).
#[derive(Debug, Clone)]
pub struct RawKline {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time_ms: i64,
    pub quote_volume: f64,
    pub trade_count: i64,
    pub taker_buy_base: f64,
    pub taker_buy_quote: f64,
}

/// The upstream REST contract, modeled as a trait so the rate
/// limiter and chunking logic can be exercised against a mock without a
/// live endpoint.
#[async_trait]
pub trait KlineSource: Send + Sync {
    /// Fetch up to `limit` candles for `symbol` in `[start, end)`. A 429 is
    /// reported as `Error::RateLimited`; other 4xx/5xx as
    /// `Error::TransientNetwork`.
    async fn fetch(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RawKline>>;
}
