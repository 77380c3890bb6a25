use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde_json::Value;

use mrq_core::error::{Error, Result};
use mrq_core::traits::{KlineSource, RawKline};

/// The upstream REST contract: a GET endpoint returning a JSON
/// array of array-encoded candles, numeric fields as strings or numbers.
pub struct HttpKlineSource {
    base_url: String,
    client: Client,
}

impl HttpKlineSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait]
impl KlineSource for HttpKlineSource {
    async fn fetch(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<RawKline>> {
        let url = format!("{}/klines", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("startTime", start.timestamp_millis().to_string()),
                ("endTime", end.timestamp_millis().to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::TransientNetwork(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(Error::RateLimited { retry_after_ms: retry_after.map(|s| s * 1000) });
        }
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TransientNetwork(format!("HTTP {status}: {body}")));
        }

        let body: Vec<Value> = response
            .json()
            .await
            .map_err(|e| Error::TransientNetwork(e.to_string()))?;

        body.iter().map(parse_kline).collect()
    }
}

fn parse_kline(row: &Value) -> Result<RawKline> {
    let arr = row
        .as_array()
        .ok_or_else(|| Error::InvalidInput("kline row is not an array".into()))?;
    if arr.len() < 11 {
        return Err(Error::InvalidInput(format!(
            "kline row has {} fields, need at least 11",
            arr.len()
        )));
    }

    Ok(RawKline {
        open_time_ms: as_i64(&arr[0])?,
        open: as_f64(&arr[1])?,
        high: as_f64(&arr[2])?,
        low: as_f64(&arr[3])?,
        close: as_f64(&arr[4])?,
        volume: as_f64(&arr[5])?,
        close_time_ms: as_i64(&arr[6])?,
        quote_volume: as_f64(&arr[7])?,
        trade_count: as_i64(&arr[8])?,
        taker_buy_base: as_f64(&arr[9])?,
        taker_buy_quote: as_f64(&arr[10])?,
    })
}

fn as_f64(v: &Value) -> Result<f64> {
    match v {
        Value::Number(n) => n.as_f64().ok_or_else(|| Error::InvalidInput("non-finite numeric field".into())),
        Value::String(s) => s.parse().map_err(|_| Error::InvalidInput(format!("cannot parse '{s}' as f64"))),
        _ => Err(Error::InvalidInput("expected numeric or string field".into())),
    }
}

fn as_i64(v: &Value) -> Result<i64> {
    match v {
        Value::Number(n) => n.as_i64().ok_or_else(|| Error::InvalidInput("non-integer numeric field".into())),
        Value::String(s) => s.parse().map_err(|_| Error::InvalidInput(format!("cannot parse '{s}' as i64"))),
        _ => Err(Error::InvalidInput("expected numeric or string field".into())),
    }
}

pub fn kline_open_time(raw: &RawKline) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(raw.open_time_ms).single().unwrap_or_else(Utc::now)
}

pub fn kline_close_time(raw: &RawKline) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(raw.close_time_ms).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_numeric_and_string_encoded_rows() {
        let numeric = json!([1690000000000i64, 100.0, 101.0, 99.0, 100.5, 10.0, 1690000300000i64, 1005.0, 42, 5.0, 502.5, "ignore"]);
        let stringy = json!(["1690000000000", "100.0", "101.0", "99.0", "100.5", "10.0", "1690000300000", "1005.0", "42", "5.0", "502.5"]);

        let a = parse_kline(&numeric).unwrap();
        let b = parse_kline(&stringy).unwrap();
        assert_eq!(a.open_time_ms, b.open_time_ms);
        assert!((a.close - b.close).abs() < 1e-9);
    }

    #[test]
    fn rejects_short_rows() {
        let row = json!([1, 2, 3]);
        assert!(parse_kline(&row).is_err());
    }
}
