//! Probe, plan, fetch and assemble one candle series.

pub mod aggregate;
pub mod limiter;
pub mod planner;
pub mod pool;

use std::sync::Arc;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::error::Result;
use crate::fetch::{probe, Candle, CandleSource};
use crate::utils::format_timestamp;

pub use aggregate::{aggregate, dedup_ordered, integrity_scan, merge, IntegrityReport};
pub use limiter::RateLimiter;
pub use planner::{plan, resolve_target, PlannedPage, Target};
pub use pool::{distribute, WorkerPool};

/// Series produced by one download together with what was learned on the way.
#[derive(Debug, Clone)]
pub struct Download {
    pub candles: Vec<Candle>,
    pub interval: i64,
    pub page_size: usize,
    pub pages_fetched: usize,
    pub integrity: IntegrityReport,
}

/// Parameters of one download run.
#[derive(Debug, Clone)]
pub struct DownloadRequest<'a> {
    pub market: &'a str,
    pub timeframe: &'a str,
    pub since: i64,
    pub target: Target,
    pub workers: usize,
    pub now: i64,
}

pub struct Downloader {
    source: Arc<dyn CandleSource>,
    retry: RetryPolicy,
    verbose: bool,
}

impl Downloader {
    pub fn new(source: Arc<dyn CandleSource>, retry: RetryPolicy, verbose: bool) -> Self {
        Self {
            source,
            retry,
            verbose,
        }
    }

    pub async fn download(
        &self,
        request: &DownloadRequest<'_>,
        token: &CancellationToken,
    ) -> Result<Download> {
        let DownloadRequest {
            market,
            timeframe,
            since,
            target,
            workers,
            now,
        } = *request;

        let probe = probe(self.source.as_ref(), market, timeframe, since).await?;
        let interval = probe.interval;
        let page_size = probe.page_size;
        let first = probe.first_timestamp();
        let target_count = resolve_target(target, first, interval, now);

        let pages = plan(&probe, market, timeframe, target_count, now);
        let pages_fetched = pages.len() + 1;
        // counts may be arbitrarily large, only the planner bounds them by `now`
        let last_expected = i64::try_from(target_count.saturating_sub(1))
            .ok()
            .and_then(|steps| steps.checked_mul(interval))
            .and_then(|span| first.checked_add(span))
            .map_or(now, |last| last.min(now));
        let report = format!(
            "{} {} from {} to {}",
            market,
            timeframe,
            format_timestamp(first),
            format_timestamp(last_expected)
        );
        if self.verbose {
            info!("downloading {report} ({} pages)", pages_fetched);
        } else {
            debug!("downloading {report} ({} pages)", pages_fetched);
        }

        let limiter = Arc::new(RateLimiter::new(self.retry.clone(), self.verbose));
        let pool = WorkerPool::new(
            Arc::clone(&self.source),
            limiter,
            self.retry.clone(),
            workers,
        );
        let fetched = pool.run(pages, token).await?;

        let candles = aggregate(probe.page, fetched, target_count);
        let integrity = integrity_scan(&candles, interval);
        if integrity.missing > 0 {
            warn!(
                "integrity check: {} candles missing across {} gaps in {} {}, most likely an upstream outage",
                integrity.missing,
                integrity.gaps.len(),
                market,
                timeframe
            );
        }

        Ok(Download {
            candles,
            interval,
            page_size,
            pages_fetched,
            integrity,
        })
    }
}
