use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use mrq_core::error::{Error, Result};
use mrq_core::traits::CandleStore;
use mrq_core::types::Candle;

/// `sqlx`-backed candle store. Single-writer in the ingest path, read-only
/// in the backtest path.
pub struct SqlCandleStore {
    pool: sqlx::AnyPool,
}

impl SqlCandleStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandleStore for SqlCandleStore {
    async fn insert_many(&self, candles: &[Candle], skip_duplicates: bool) -> Result<u64> {
        let mut inserted = 0u64;
        for candle in candles {
            let query = if skip_duplicates {
                "INSERT OR IGNORE INTO candles (
                    symbol, open_time, close_time, open, high, low, close,
                    volume, quote_volume, trade_count, taker_buy_base, taker_buy_quote
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            } else {
                "INSERT INTO candles (
                    symbol, open_time, close_time, open, high, low, close,
                    volume, quote_volume, trade_count, taker_buy_base, taker_buy_quote
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            };

            let result = sqlx::query(query)
                .bind(&candle.symbol)
                .bind(candle.open_time.to_rfc3339())
                .bind(candle.close_time.to_rfc3339())
                .bind(candle.open)
                .bind(candle.high)
                .bind(candle.low)
                .bind(candle.close)
                .bind(candle.volume)
                .bind(candle.quote_volume)
                .bind(candle.trade_count)
                .bind(candle.taker_buy_base)
                .bind(candle.taker_buy_quote)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::PersistenceError(e.to_string()))?;

            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    async fn query(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Candle>> {
        let rows = sqlx::query(
            "SELECT symbol, open_time, close_time, open, high, low, close,
                    volume, quote_volume, trade_count, taker_buy_base, taker_buy_quote
             FROM candles
             WHERE symbol = ? AND open_time >= ? AND open_time < ?
             ORDER BY open_time ASC",
        )
        .bind(symbol)
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::PersistenceError(e.to_string()))?;

        rows.into_iter().map(row_to_candle).collect()
    }
}

fn row_to_candle(row: sqlx::any::AnyRow) -> Result<Candle> {
    let parse_time = |s: String| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::PersistenceError(e.to_string()))
    };

    Ok(Candle {
        symbol: row.try_get("symbol").map_err(|e| Error::PersistenceError(e.to_string()))?,
        open_time: parse_time(row.try_get("open_time").map_err(|e| Error::PersistenceError(e.to_string()))?)?,
        close_time: parse_time(row.try_get("close_time").map_err(|e| Error::PersistenceError(e.to_string()))?)?,
        open: row.try_get("open").map_err(|e| Error::PersistenceError(e.to_string()))?,
        high: row.try_get("high").map_err(|e| Error::PersistenceError(e.to_string()))?,
        low: row.try_get("low").map_err(|e| Error::PersistenceError(e.to_string()))?,
        close: row.try_get("close").map_err(|e| Error::PersistenceError(e.to_string()))?,
        volume: row.try_get("volume").map_err(|e| Error::PersistenceError(e.to_string()))?,
        quote_volume: row.try_get("quote_volume").map_err(|e| Error::PersistenceError(e.to_string()))?,
        trade_count: row.try_get("trade_count").map_err(|e| Error::PersistenceError(e.to_string()))?,
        taker_buy_base: row.try_get("taker_buy_base").map_err(|e| Error::PersistenceError(e.to_string()))?,
        taker_buy_quote: row.try_get("taker_buy_quote").map_err(|e| Error::PersistenceError(e.to_string()))?,
    })
}
