//! In-memory source used by the pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::fetch::{Candle, CandleSource, RequestDescriptor, SourceError};

pub struct SyntheticSource {
    candles: Vec<Candle>,
    page_size: usize,
    leading_overlap: usize,
    // calls in fail_from..fail_until return `failure`
    fail_from: usize,
    fail_until: usize,
    failure: Option<SourceError>,
    panic_at: Option<usize>,
    calls: AtomicUsize,
    requests: Mutex<Vec<RequestDescriptor>>,
}

impl SyntheticSource {
    pub fn from_candles(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|candle| candle.timestamp);
        Self {
            candles,
            page_size: 1000,
            leading_overlap: 0,
            fail_from: 0,
            fail_until: 0,
            failure: None,
            panic_at: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// `count` candles spaced by `interval`, starting at `start`.
    pub fn contiguous(start: i64, interval: i64, count: usize) -> Self {
        Self::from_candles(series(start, interval, count))
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Also return this many candles preceding `since` in every page.
    pub fn with_leading_overlap(mut self, rows: usize) -> Self {
        self.leading_overlap = rows;
        self
    }

    /// Drop `missing` candles right after position `after`.
    pub fn with_gap(mut self, after: usize, missing: usize) -> Self {
        self.candles.drain(after + 1..after + 1 + missing);
        self
    }

    /// Fail every call with `error`.
    pub fn failing_with(mut self, error: SourceError) -> Self {
        self.failure = Some(error);
        self.fail_from = 0;
        self.fail_until = usize::MAX;
        self
    }

    /// Fail the first `calls` calls with `error`, then behave normally.
    pub fn failing_first(mut self, calls: usize, error: SourceError) -> Self {
        self.failure = Some(error);
        self.fail_from = 0;
        self.fail_until = calls;
        self
    }

    /// Serve the first `calls` calls, then fail every later one with `error`.
    pub fn failing_after(mut self, calls: usize, error: SourceError) -> Self {
        self.failure = Some(error);
        self.fail_from = calls;
        self.fail_until = usize::MAX;
        self
    }

    /// Panic on the call with this zero-based number.
    pub fn panicking_at(mut self, call: usize) -> Self {
        self.panic_at = Some(call);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RequestDescriptor> {
        self.requests.lock().unwrap().clone()
    }

    pub fn extend(&mut self, candles: Vec<Candle>) {
        self.candles.extend(candles);
        self.candles.sort_by_key(|candle| candle.timestamp);
    }
}

#[async_trait]
impl CandleSource for SyntheticSource {
    fn id(&self) -> &str {
        "synthetic"
    }

    fn max_page_size(&self) -> usize {
        self.page_size
    }

    async fn fetch_page(&self, request: &RequestDescriptor) -> Result<Vec<Candle>, SourceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if self.panic_at == Some(call) {
            panic!("synthetic source panicked on call {call}");
        }
        if (self.fail_from..self.fail_until).contains(&call) {
            if let Some(error) = &self.failure {
                return Err(error.clone());
            }
        }

        let start = self
            .candles
            .partition_point(|candle| candle.timestamp < request.since)
            .saturating_sub(self.leading_overlap);
        let take = request.count.min(self.page_size);

        Ok(self.candles.iter().skip(start).take(take).copied().collect())
    }
}

pub fn candle(timestamp: i64) -> Candle {
    let base = (timestamp / 60_000) as f64;
    Candle {
        timestamp,
        open: base,
        high: base + 2.0,
        low: base - 1.0,
        close: base + 1.0,
        volume: 10.0,
    }
}

pub fn series(start: i64, interval: i64, count: usize) -> Vec<Candle> {
    (0..count as i64)
        .map(|i| candle(start + i * interval))
        .collect()
}
