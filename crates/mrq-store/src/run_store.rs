use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use mrq_core::error::{Error, Result};
use mrq_core::traits::RunStore;
use mrq_core::types::{BacktestRun, ParameterSet};

/// `sqlx`-backed run store, owned exclusively by the walk-forward driver.
pub struct SqlRunStore {
    pool: sqlx::AnyPool,
}

impl SqlRunStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RunStore for SqlRunStore {
    async fn create(&self, run: &BacktestRun) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO backtest_runs (
                symbol, base, quote, z_score_threshold, ma_period, profit_pct, stop_loss_pct,
                start_time, end_time, window_size_months, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id",
        )
        .bind(&run.symbol)
        .bind(&run.base)
        .bind(&run.quote)
        .bind(run.params.z_score_threshold)
        .bind(run.params.ma_period as i64)
        .bind(run.params.profit_pct)
        .bind(run.params.stop_loss_pct)
        .bind(run.start_time.to_rfc3339())
        .bind(run.end_time.to_rfc3339())
        .bind(run.window_size_months as i64)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::PersistenceError(e.to_string()))?;

        row.try_get::<i64, _>("id").map_err(|e| Error::PersistenceError(e.to_string()))
    }

    async fn list_by_params(&self, params: &ParameterSet, base: &str, quote: &str) -> Result<Vec<BacktestRun>> {
        let rows = sqlx::query(
            "SELECT id, symbol, base, quote, z_score_threshold, ma_period, profit_pct, stop_loss_pct,
                    start_time, end_time, window_size_months, created_at
             FROM backtest_runs
             WHERE base = ? AND quote = ? AND z_score_threshold = ? AND ma_period = ? AND profit_pct = ? AND stop_loss_pct = ?
             ORDER BY created_at DESC",
        )
        .bind(base)
        .bind(quote)
        .bind(params.z_score_threshold)
        .bind(params.ma_period as i64)
        .bind(params.profit_pct)
        .bind(params.stop_loss_pct)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::PersistenceError(e.to_string()))?;

        rows.into_iter().map(row_to_run).collect()
    }
}

fn row_to_run(row: sqlx::any::AnyRow) -> Result<BacktestRun> {
    let parse_time = |s: String| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::PersistenceError(e.to_string()))
    };
    let perr = |e: sqlx::Error| Error::PersistenceError(e.to_string());

    let ma_period: i64 = row.try_get("ma_period").map_err(perr)?;
    let window_size_months: i64 = row.try_get("window_size_months").map_err(perr)?;

    Ok(BacktestRun {
        id: row.try_get::<i64, _>("id").ok(),
        symbol: row.try_get("symbol").map_err(perr)?,
        base: row.try_get("base").map_err(perr)?,
        quote: row.try_get("quote").map_err(perr)?,
        params: ParameterSet {
            z_score_threshold: row.try_get("z_score_threshold").map_err(perr)?,
            ma_period: ma_period as usize,
            profit_pct: row.try_get("profit_pct").map_err(perr)?,
            stop_loss_pct: row.try_get("stop_loss_pct").map_err(perr)?,
        },
        start_time: parse_time(row.try_get("start_time").map_err(perr)?)?,
        end_time: parse_time(row.try_get("end_time").map_err(perr)?)?,
        window_size_months: window_size_months as u32,
        created_at: row
            .try_get::<String, _>("created_at")
            .ok()
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::init_schema;

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

    fn run(symbol: &str, params: ParameterSet, start: DateTime<Utc>) -> BacktestRun {
        BacktestRun {
            id: None,
            symbol: symbol.into(),
            base: "BTC".into(),
            quote: "USDT".into(),
            params,
            start_time: start,
            end_time: start + chrono::Duration::days(180),
            window_size_months: 6,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_an_id_and_list_by_params_finds_it() {
        let pool = memory_pool().await;
        let store = SqlRunStore::new(pool);
        let params = ParameterSet { z_score_threshold: 2.0, ma_period: 50, profit_pct: 5.0, stop_loss_pct: 2.5 };
        let id = store.create(&run("BTCUSDT", params, Utc::now())).await.unwrap();
        assert!(id > 0);

        let found = store.list_by_params(&params, "BTC", "USDT").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, Some(id));
    }

    #[tokio::test]
    async fn list_by_params_orders_newest_first_and_ignores_other_params() {
        let pool = memory_pool().await;
        let store = SqlRunStore::new(pool);
        let params = ParameterSet { z_score_threshold: 2.0, ma_period: 50, profit_pct: 5.0, stop_loss_pct: 2.5 };
        let other_params = ParameterSet { z_score_threshold: 3.0, ma_period: 20, profit_pct: 4.0, stop_loss_pct: 2.0 };

        let t0 = Utc::now();
        store.create(&run("BTCUSDT", params, t0)).await.unwrap();
        let second_id = store.create(&run("BTCUSDT", params, t0 + chrono::Duration::days(90))).await.unwrap();
        store.create(&run("BTCUSDT", other_params, t0)).await.unwrap();

        let found = store.list_by_params(&params, "BTC", "USDT").await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, Some(second_id));
    }
}
