use log::debug;

use crate::error::{AppError, Result};
use crate::fetch::{Candle, CandleSource, RequestDescriptor};

/// Outcome of the exploratory first fetch.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub page: Vec<Candle>,
    pub page_size: usize,
    pub interval: i64,
}

impl ProbeResult {
    pub fn first_timestamp(&self) -> i64 {
        self.page[0].timestamp
    }

    pub fn last_timestamp(&self) -> i64 {
        self.page[self.page.len() - 1].timestamp
    }
}

/// Fetch one full page to learn how many candles the source returns per call and the spacing
/// between them. Source errors are returned as-is; nothing is retried here.
pub async fn probe(
    source: &dyn CandleSource,
    market: &str,
    timeframe: &str,
    since: i64,
) -> Result<ProbeResult> {
    let request = RequestDescriptor::new(market, timeframe, since, source.max_page_size());
    let page = source.fetch_page(&request).await?;

    match page.len() {
        0 => {
            return Err(AppError::insufficient_data(
                market,
                timeframe,
                "source returned no candles",
            ))
        }
        1 => {
            return Err(AppError::insufficient_data(
                market,
                timeframe,
                "a single candle is not enough to derive the interval",
            ))
        }
        _ => {}
    }

    let interval = page[1].timestamp - page[0].timestamp;
    if interval <= 0 {
        return Err(AppError::insufficient_data(
            market,
            timeframe,
            format!("non-increasing timestamps in first page (delta {interval})"),
        ));
    }

    debug!(
        "probe {} {}: {} candles, interval {} ms",
        market,
        timeframe,
        page.len(),
        interval
    );

    Ok(ProbeResult {
        page_size: page.len(),
        page,
        interval,
    })
}
