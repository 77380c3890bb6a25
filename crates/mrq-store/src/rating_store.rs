use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use mrq_core::error::{Error, Result};
use mrq_core::traits::{RatingStore, RatingSummary};
use mrq_core::types::Rating;

/// `sqlx`-backed rating store, read-only in the backtest path.
pub struct SqlRatingStore {
    pool: sqlx::AnyPool,
}

impl SqlRatingStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    /// Not part of the `RatingStore` contract (which only specifies
    /// `query`/`summarize`); used by ingest paths that also backfill
    /// ratings alongside candles.
    pub async fn insert_many(&self, ratings: &[Rating]) -> Result<u64> {
        let mut inserted = 0u64;
        for rating in ratings {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO ratings (symbol, timestamp, rating, rating_deviation, volatility, performance_score)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&rating.symbol)
            .bind(rating.timestamp.to_rfc3339())
            .bind(rating.rating)
            .bind(rating.rating_deviation)
            .bind(rating.volatility)
            .bind(rating.performance_score)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::PersistenceError(e.to_string()))?;

            inserted += result.rows_affected();
        }
        Ok(inserted)
    }
}

#[async_trait]
impl RatingStore for SqlRatingStore {
    async fn query(&self, symbol: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Rating>> {
        let rows = sqlx::query(
            "SELECT symbol, timestamp, rating, rating_deviation, volatility, performance_score
             FROM ratings
             WHERE symbol = ? AND timestamp >= ? AND timestamp < ?
             ORDER BY timestamp ASC",
        )
        .bind(symbol)
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::PersistenceError(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let ts: String = row.try_get("timestamp").map_err(|e| Error::PersistenceError(e.to_string()))?;
                let timestamp = DateTime::parse_from_rfc3339(&ts)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| Error::PersistenceError(e.to_string()))?;
                Ok(Rating {
                    symbol: row.try_get("symbol").map_err(|e| Error::PersistenceError(e.to_string()))?,
                    timestamp,
                    rating: row.try_get("rating").map_err(|e| Error::PersistenceError(e.to_string()))?,
                    rating_deviation: row.try_get("rating_deviation").map_err(|e| Error::PersistenceError(e.to_string()))?,
                    volatility: row.try_get("volatility").map_err(|e| Error::PersistenceError(e.to_string()))?,
                    performance_score: row.try_get("performance_score").map_err(|e| Error::PersistenceError(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn summarize(&self, symbol: &str) -> Result<RatingSummary> {
        let row = sqlx::query(
            "SELECT MIN(timestamp) as min_ts, MAX(timestamp) as max_ts, COUNT(*) as cnt FROM ratings WHERE symbol = ?",
        )
        .bind(symbol)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::PersistenceError(e.to_string()))?;

        let min_ts: Option<String> = row.try_get("min_ts").ok();
        let max_ts: Option<String> = row.try_get("max_ts").ok();
        let count: i64 = row.try_get("cnt").unwrap_or(0);

        Ok(RatingSummary {
            min_ts: min_ts.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|t| t.with_timezone(&Utc)),
            max_ts: max_ts.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|t| t.with_timezone(&Utc)),
            count: count.max(0) as u64,
        })
    }
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

    #[tokio::test]
    async fn summarize_reflects_inserted_range() {
        let pool = memory_pool().await;
        let store = SqlRatingStore::new(pool);
        let t0 = Utc::now();
        let ratings = vec![
            Rating { symbol: "BTCUSDT".into(), timestamp: t0, rating: 1500.0, rating_deviation: 30.0, volatility: 0.05, performance_score: 0.1 },
            Rating { symbol: "BTCUSDT".into(), timestamp: t0 + chrono::Duration::minutes(5), rating: 1510.0, rating_deviation: 29.0, volatility: 0.05, performance_score: 0.1 },
        ];
        store.insert_many(&ratings).await.unwrap();

        let summary = store.summarize("BTCUSDT").await.unwrap();
        assert_eq!(summary.count, 2);
        assert!(summary.min_ts.is_some());
        assert!(summary.max_ts.unwrap() > summary.min_ts.unwrap());
    }
}
