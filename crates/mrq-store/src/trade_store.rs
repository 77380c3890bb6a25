use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use mrq_core::error::{Error, Result};
use mrq_core::traits::TradeStore;
use mrq_core::types::{ExitReason, Trade};

/// `sqlx`-backed trade store, owned exclusively by the walk-forward driver.
pub struct SqlTradeStore {
    pool: sqlx::AnyPool,
}

impl SqlTradeStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TradeStore for SqlTradeStore {
    async fn insert_many(&self, trades: &[Trade]) -> Result<()> {
        for trade in trades {
            sqlx::query(
                "INSERT INTO trades (run_id, open_time, close_time, entry_price, exit_price, quantity, exit_reason, pnl, pnl_pct)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(trade.run_id)
            .bind(trade.open_time.to_rfc3339())
            .bind(trade.close_time.to_rfc3339())
            .bind(trade.entry_price)
            .bind(trade.exit_price)
            .bind(trade.quantity)
            .bind(exit_reason_str(trade.exit_reason))
            .bind(trade.pnl)
            .bind(trade.pnl_pct)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::PersistenceError(e.to_string()))?;
        }
        Ok(())
    }

    async fn query(&self, run_id: i64) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            "SELECT run_id, open_time, close_time, entry_price, exit_price, quantity, exit_reason, pnl, pnl_pct
             FROM trades WHERE run_id = ? ORDER BY open_time ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::PersistenceError(e.to_string()))?;

        rows.into_iter().map(row_to_trade).collect()
    }
}

fn exit_reason_str(reason: ExitReason) -> &'static str {
    match reason {
        ExitReason::TakeProfit => "TakeProfit",
        ExitReason::StopLoss => "StopLoss",
        ExitReason::WindowEnd => "WindowEnd",
    }
}

fn parse_exit_reason(s: &str) -> Result<ExitReason> {
    match s {
        "TakeProfit" => Ok(ExitReason::TakeProfit),
        "StopLoss" => Ok(ExitReason::StopLoss),
        "WindowEnd" => Ok(ExitReason::WindowEnd),
        other => Err(Error::PersistenceError(format!("unknown exit_reason '{other}'"))),
    }
}

fn row_to_trade(row: sqlx::any::AnyRow) -> Result<Trade> {
    let perr = |e: sqlx::Error| Error::PersistenceError(e.to_string());
    let parse_time = |s: String| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::PersistenceError(e.to_string()))
    };
    let reason: String = row.try_get("exit_reason").map_err(perr)?;

    Ok(Trade {
        run_id: row.try_get::<i64, _>("run_id").ok(),
        open_time: parse_time(row.try_get("open_time").map_err(perr)?)?,
        close_time: parse_time(row.try_get("close_time").map_err(perr)?)?,
        entry_price: row.try_get("entry_price").map_err(perr)?,
        exit_price: row.try_get("exit_price").map_err(perr)?,
        quantity: row.try_get("quantity").map_err(perr)?,
        exit_reason: parse_exit_reason(&reason)?,
        pnl: row.try_get("pnl").map_err(perr)?,
        pnl_pct: row.try_get("pnl_pct").map_err(perr)?,
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

    fn trade(run_id: i64, open_time: DateTime<Utc>, reason: ExitReason) -> Trade {
        Trade {
            run_id: Some(run_id),
            open_time,
            close_time: open_time + chrono::Duration::hours(4),
            entry_price: 100.0,
            exit_price: 105.0,
            quantity: 1.5,
            exit_reason: reason,
            pnl: 7.5,
            pnl_pct: 5.0,
        }
    }

    #[tokio::test]
    async fn insert_many_then_query_round_trips_in_open_time_order() {
        let pool = memory_pool().await;
        let store = SqlTradeStore::new(pool);
        let t0 = Utc::now();
        let trades = vec![
            trade(1, t0 + chrono::Duration::hours(10), ExitReason::StopLoss),
            trade(1, t0, ExitReason::TakeProfit),
            trade(2, t0, ExitReason::WindowEnd),
        ];
        store.insert_many(&trades).await.unwrap();

        let found = store.query(1).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].exit_reason, ExitReason::TakeProfit);
        assert_eq!(found[1].exit_reason, ExitReason::StopLoss);
        assert!((found[0].pnl - 7.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn query_for_unknown_run_returns_empty() {
        let pool = memory_pool().await;
        let store = SqlTradeStore::new(pool);
        let found = store.query(999).await.unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn exit_reason_round_trips_through_its_string_encoding() {
        for reason in [ExitReason::TakeProfit, ExitReason::StopLoss, ExitReason::WindowEnd] {
            assert_eq!(parse_exit_reason(exit_reason_str(reason)).unwrap(), reason);
        }
    }
}
