use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::{Context, Result};
use crate::fetch::{Candle, CandleSource, RequestDescriptor, SourceError};

const KLINES_ENDPOINT: &str = "https://api.binance.com/api/v3/klines";
const MAX_PAGE_SIZE: usize = 1000;

/// Binance spot klines over the public REST API.
pub struct BinanceSource {
    client: Client,
    endpoint: String,
}

impl BinanceSource {
    pub fn new() -> Result<Self> {
        Self::with_endpoint(KLINES_ENDPOINT)
    }

    pub fn with_endpoint(endpoint: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to construct klines HTTP client")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl CandleSource for BinanceSource {
    fn id(&self) -> &str {
        "binance"
    }

    fn max_page_size(&self) -> usize {
        MAX_PAGE_SIZE
    }

    async fn fetch_page(&self, request: &RequestDescriptor) -> std::result::Result<Vec<Candle>, SourceError> {
        let symbol = exchange_symbol(&request.market);
        let limit = request.count.clamp(1, MAX_PAGE_SIZE).to_string();
        let since = request.since.to_string();

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("symbol", symbol.as_str()),
                ("interval", request.timeframe.as_str()),
                ("startTime", since.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await
            .map_err(|err| SourceError::Transient(format!("klines request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, &symbol));
        }

        let body = response
            .text()
            .await
            .map_err(|err| SourceError::Transient(format!("failed to read klines body: {err}")))?;

        parse_klines(&body)
    }
}

/// `BTC/USDT` and `BTC-USDT` both map to `BTCUSDT`.
pub fn exchange_symbol(market: &str) -> String {
    market
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn classify_status(status: StatusCode, symbol: &str) -> SourceError {
    match status {
        // 418 is the IP ban Binance issues after ignoring 429s
        StatusCode::TOO_MANY_REQUESTS | StatusCode::IM_A_TEAPOT => {
            SourceError::RateLimited(format!("klines for {symbol} throttled ({status})"))
        }
        status if status.is_server_error() => {
            SourceError::Transient(format!("klines for {symbol} failed with status {status}"))
        }
        status => SourceError::Permanent(format!("klines for {symbol} rejected with status {status}")),
    }
}

fn parse_klines(body: &str) -> std::result::Result<Vec<Candle>, SourceError> {
    let root: Value = serde_json::from_str(body)
        .map_err(|err| SourceError::Permanent(format!("failed to parse klines JSON: {err}")))?;

    let rows = root
        .as_array()
        .ok_or_else(|| SourceError::Permanent("klines payload is not an array".to_string()))?;

    let mut candles = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(fields) = row.as_array() else {
            return Err(SourceError::Permanent("kline row is not an array".to_string()));
        };
        if fields.len() < 6 {
            return Err(SourceError::Permanent(format!(
                "kline row has {} fields, expected at least 6",
                fields.len()
            )));
        }

        let timestamp = fields[0]
            .as_i64()
            .ok_or_else(|| SourceError::Permanent("kline open time is not an integer".to_string()))?;

        candles.push(Candle {
            timestamp,
            open: parse_number(&fields[1])?,
            high: parse_number(&fields[2])?,
            low: parse_number(&fields[3])?,
            close: parse_number(&fields[4])?,
            volume: parse_number(&fields[5])?,
        });
    }

    candles.sort_by_key(|candle| candle.timestamp);
    Ok(candles)
}

fn parse_number(value: &Value) -> std::result::Result<f64, SourceError> {
    value
        .as_str()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .or_else(|| value.as_f64())
        .ok_or_else(|| SourceError::Permanent(format!("unexpected kline value {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kline_payload() {
        let sample = r#"[
            [1672531260000, "16541.77", "16544.76", "16538.45", "16543.67", "83.08143", 1672531319999, "1374268.2", 2013, "41.1", "679.9", "0"],
            [1672531200000, "16541.19", "16544.41", "16527.51", "16539.31", "119.68347", 1672531259999, "1980053.4", 2544, "61.2", "1012.6", "0"]
        ]"#;

        let candles = parse_klines(sample).unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, 1_672_531_200_000);
        assert!((candles[0].close - 16539.31).abs() < 1e-9);
        assert!((candles[1].volume - 83.08143).abs() < 1e-9);
    }

    #[test]
    fn malformed_payload_is_permanent() {
        let err = parse_klines(r#"{"code": -1121, "msg": "Invalid symbol."}"#).unwrap_err();
        assert!(matches!(err, SourceError::Permanent(_)));

        let err = parse_klines(r#"[[1672531200000, "1.0"]]"#).unwrap_err();
        assert!(err.to_string().contains("expected at least 6"));
    }

    #[test]
    fn classifies_http_statuses() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "BTCUSDT"),
            SourceError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "BTCUSDT"),
            SourceError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "BTCUSDT"),
            SourceError::Permanent(_)
        ));
    }

    #[test]
    fn normalizes_market_symbols() {
        assert_eq!(exchange_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(exchange_symbol("eth-btc"), "ETHBTC");
    }
}
