use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use mrq_core::error::{Error, Result};
use mrq_core::traits::{MetricsFilter, MetricsStore, RankedMetrics};
use mrq_core::types::{AggregateMetrics, BacktestRun, Objective, ParameterSet};

/// `sqlx`-backed aggregate-metrics store. Owned by the walk-forward driver,
/// consumed by the optimizer scheduler for dedup lookups and ranking.
pub struct SqlMetricsStore {
    pool: sqlx::AnyPool,
}

impl SqlMetricsStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsStore for SqlMetricsStore {
    async fn upsert(&self, params: &ParameterSet, window: &BacktestRun, metrics: &AggregateMetrics) -> Result<()> {
        let fingerprint = params.fingerprint();
        let metrics_json = serde_json::to_string(metrics)?;

        sqlx::query(
            "INSERT INTO aggregate_metrics (
                fingerprint, symbol, base, quote, z_score_threshold, ma_period, profit_pct, stop_loss_pct,
                average_return_per_window, std_return_per_window, positive_window_ratio, metrics_json, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint, symbol, base, quote) DO UPDATE SET
                average_return_per_window = excluded.average_return_per_window,
                std_return_per_window = excluded.std_return_per_window,
                positive_window_ratio = excluded.positive_window_ratio,
                metrics_json = excluded.metrics_json,
                updated_at = excluded.updated_at",
        )
        .bind(&fingerprint)
        .bind(&window.symbol)
        .bind(&window.base)
        .bind(&window.quote)
        .bind(params.z_score_threshold)
        .bind(params.ma_period as i64)
        .bind(params.profit_pct)
        .bind(params.stop_loss_pct)
        .bind(metrics.average_return_per_window)
        .bind(metrics.std_return_per_window)
        .bind(metrics.positive_window_ratio)
        .bind(&metrics_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::PersistenceError(e.to_string()))?;

        Ok(())
    }

    async fn top_n(&self, objective: Objective, n: usize, filters: &MetricsFilter) -> Result<Vec<RankedMetrics>> {
        let mut sql = String::from(
            "SELECT symbol, base, quote, z_score_threshold, ma_period, profit_pct, stop_loss_pct, metrics_json
             FROM aggregate_metrics WHERE 1=1",
        );
        if filters.symbol.is_some() {
            sql.push_str(" AND symbol = ?");
        }
        if filters.base.is_some() {
            sql.push_str(" AND base = ?");
        }
        if filters.quote.is_some() {
            sql.push_str(" AND quote = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(symbol) = &filters.symbol {
            query = query.bind(symbol);
        }
        if let Some(base) = &filters.base {
            query = query.bind(base);
        }
        if let Some(quote) = &filters.quote {
            query = query.bind(quote);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| Error::PersistenceError(e.to_string()))?;

        let mut ranked = Vec::with_capacity(rows.len());
        for row in rows {
            let perr = |e: sqlx::Error| Error::PersistenceError(e.to_string());
            let symbol: String = row.try_get("symbol").map_err(perr)?;
            let ma_period: i64 = row.try_get("ma_period").map_err(perr)?;
            let params = ParameterSet {
                z_score_threshold: row.try_get("z_score_threshold").map_err(perr)?,
                ma_period: ma_period as usize,
                profit_pct: row.try_get("profit_pct").map_err(perr)?,
                stop_loss_pct: row.try_get("stop_loss_pct").map_err(perr)?,
            };
            let metrics_json: String = row.try_get("metrics_json").map_err(perr)?;
            let metrics: AggregateMetrics = serde_json::from_str(&metrics_json)?;
            let objective_value = objective.extract(&metrics);

            ranked.push(RankedMetrics { params, symbol, metrics, objective_value });
        }

        ranked.sort_by(|a, b| b.objective_value.partial_cmp(&a.objective_value).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(n);
        Ok(ranked)
    }

    async fn has_result(&self, fingerprint: &str) -> Result<bool> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM aggregate_metrics WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::PersistenceError(e.to_string()))?;
        let count: i64 = row.try_get("cnt").map_err(|e| Error::PersistenceError(e.to_string()))?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::init_schema;
    use chrono::Utc;
    use mrq_core::types::WindowMetrics;

    async fn memory_pool() -> sqlx::AnyPool {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        init_schema(&pool).await.unwrap();
        pool
    }

    fn sample_run() -> BacktestRun {
        BacktestRun {
            id: None,
            symbol: "BTCUSDT".into(),
            base: "BTC".into(),
            quote: "USDT".into(),
            params: ParameterSet { z_score_threshold: 2.0, ma_period: 50, profit_pct: 5.0, stop_loss_pct: 2.5 },
            start_time: Utc::now(),
            end_time: Utc::now(),
            window_size_months: 6,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn dedup_and_ranking_round_trip() {
        let pool = memory_pool().await;
        let store = SqlMetricsStore::new(pool);
        let run = sample_run();

        assert!(!store.has_result(&run.params.fingerprint()).await.unwrap());

        let mut metrics = AggregateMetrics::default();
        metrics.mean = WindowMetrics { alpha: 0.12, ..WindowMetrics::default() };
        store.upsert(&run.params, &run, &metrics).await.unwrap();

        assert!(store.has_result(&run.params.fingerprint()).await.unwrap());

        let top = store.top_n(Objective::Alpha, 5, &MetricsFilter::default()).await.unwrap();
        assert_eq!(top.len(), 1);
        assert!((top[0].objective_value - 0.12).abs() < 1e-9);
    }
}
