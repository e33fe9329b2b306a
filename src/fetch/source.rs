use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One OHLCV sample. `timestamp` is the candle open time in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Parameters of a single page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub market: String,
    pub timeframe: String,
    pub since: i64,
    pub count: usize,
}

impl RequestDescriptor {
    pub fn new(market: &str, timeframe: &str, since: i64, count: usize) -> Self {
        Self {
            market: market.to_string(),
            timeframe: timeframe.to_string(),
            since,
            count,
        }
    }
}

/// Failure reported by an upstream source.
///
/// Rate limits and transient failures are retried after a cooldown, permanent ones abort the
/// download.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl SourceError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::Permanent(_))
    }
}

/// Page fetch capability of an upstream candle provider.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Stable identifier of the source, part of the dataset signature.
    fn id(&self) -> &str;

    /// Largest page the source returns for one call.
    fn max_page_size(&self) -> usize;

    /// Fetch up to `request.count` candles starting at `request.since`, ordered by timestamp.
    async fn fetch_page(&self, request: &RequestDescriptor) -> Result<Vec<Candle>, SourceError>;
}
