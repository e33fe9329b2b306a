//! Entry point tying the download pipeline to the dataset store.
//!
//! A load either serves a persisted series, tops it up with whatever the source produced since
//! the newest stored candle, or downloads from scratch when nothing is stored yet. The returned
//! series is always cut to the requested window last, so the store keeps the widest range ever
//! fetched.

use std::sync::Arc;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::download::{
    integrity_scan, merge, resolve_target, Download, DownloadRequest, Downloader, Target,
};
use crate::error::{AppError, Result};
use crate::fetch::{Candle, CandleSource};
use crate::records::{signature, DatasetMetadata, Store};
use crate::utils::{format_timestamp, now_millis, parse_limit, parse_timestamp};

/// Current time in epoch milliseconds.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub market: String,
    pub timeframe: String,
    pub since: i64,
    pub limit: Target,
    /// Fetch candles newer than the persisted ones before answering.
    pub update: bool,
    /// Overrides the configured worker count.
    pub workers: Option<usize>,
}

impl LoadRequest {
    pub fn new(market: &str, timeframe: &str, since: i64, limit: Target) -> Self {
        Self {
            market: market.to_string(),
            timeframe: timeframe.to_string(),
            since,
            limit,
            update: false,
            workers: None,
        }
    }

    /// Build a request from user-facing strings, see [`parse_timestamp`] and [`parse_limit`].
    pub fn parse(market: &str, timeframe: &str, since: &str, limit: &str) -> Result<Self> {
        Ok(Self::new(
            market,
            timeframe,
            parse_timestamp(since)?,
            parse_limit(limit)?,
        ))
    }

    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub candles: Vec<Candle>,
    /// Candles absent from `candles` given the series interval.
    pub missing: u64,
    /// Source calls made by this load, probe included.
    pub fetched_pages: usize,
    /// Dataset backing the result, `None` when persistence is disabled.
    pub signature: Option<String>,
}

pub struct Session {
    source: Arc<dyn CandleSource>,
    config: EngineConfig,
    store: Option<Store>,
    clock: Clock,
}

impl Session {
    pub fn new(source: Arc<dyn CandleSource>, config: EngineConfig) -> Self {
        let store = config.store_dir.clone().map(Store::new);
        Self {
            source,
            config,
            store,
            clock: Arc::new(now_millis),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&Store> {
        self.store.as_ref()
    }

    /// Identifier that keys datasets of this session's source.
    pub fn exchange_id(&self) -> &str {
        self.config
            .exchange_id
            .as_deref()
            .unwrap_or_else(|| self.source.id())
    }

    pub fn signature_for(&self, market: &str, timeframe: &str) -> String {
        signature(self.exchange_id(), market, timeframe)
    }

    /// Load a series, bounded by the configured deadline if there is one.
    pub async fn load(&self, request: LoadRequest) -> Result<LoadOutcome> {
        let token = CancellationToken::new();
        let Some(deadline) = self.config.deadline() else {
            return self.load_with_token(&request, &token).await;
        };

        match tokio::time::timeout(deadline, self.load_with_token(&request, &token)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                token.cancel();
                warn!(
                    "load of {} {} exceeded {}s",
                    request.market,
                    request.timeframe,
                    deadline.as_secs()
                );
                Err(AppError::Timeout(deadline))
            }
        }
    }

    /// Load a series, stopping early once `token` is cancelled.
    pub async fn load_with_token(
        &self,
        request: &LoadRequest,
        token: &CancellationToken,
    ) -> Result<LoadOutcome> {
        let now = (self.clock)();

        let Some(store) = &self.store else {
            let download = self
                .download(request, request.since, request.limit, now, token)
                .await?;
            let candles = truncate(download.candles, request.since, request.limit, download.interval);
            return Ok(outcome(candles, download.interval, download.pages_fetched, None));
        };

        let sig = self.signature_for(&request.market, &request.timeframe);
        if !store.exists(&sig) {
            return self.load_fresh(store, sig, request, now, token).await;
        }

        let metadata = store.metadata(&sig)?;
        let persisted = store.read_all(&sig)?;
        if request.since < metadata.since {
            warn!(
                "dataset {} starts at {}, later than the requested {}",
                sig,
                format_timestamp(metadata.since),
                format_timestamp(request.since)
            );
        }

        if !request.update {
            info!(
                "serving {} {} from dataset {} ({} rows)",
                request.market,
                request.timeframe,
                sig,
                persisted.len()
            );
            let candles = truncate(persisted, request.since, request.limit, metadata.interval);
            return Ok(outcome(candles, metadata.interval, 0, Some(sig)));
        }

        let (gap_since, gap_target) = match metadata.last_timestamp {
            Some(last) => (last, Target::Now),
            None => (request.since, request.limit),
        };
        let (series, pages) = match self
            .download(request, gap_since, gap_target, now, token)
            .await
        {
            Ok(download) => {
                let pages = download.pages_fetched;
                (merge(persisted, download.candles), pages)
            }
            Err(AppError::InsufficientData { .. }) => {
                info!("dataset {} is already up to date", sig);
                (persisted, 1)
            }
            Err(err) => return Err(err),
        };

        let inserted = store.merge_newer(&sig, &series, metadata.last_timestamp)?;
        info!("dataset {}: {} new candles stored", sig, inserted);

        let candles = truncate(series, request.since, request.limit, metadata.interval);
        Ok(outcome(candles, metadata.interval, pages, Some(sig)))
    }

    async fn load_fresh(
        &self,
        store: &Store,
        sig: String,
        request: &LoadRequest,
        now: i64,
        token: &CancellationToken,
    ) -> Result<LoadOutcome> {
        let download = self
            .download(request, request.since, request.limit, now, token)
            .await?;

        let metadata = DatasetMetadata::new(
            self.exchange_id(),
            &request.market,
            &request.timeframe,
            request.since,
            download.interval,
        );
        // another load may have created the dataset since the existence check
        let inserted = store.create_or_merge(&sig, &metadata, &download.candles)?;
        info!("dataset {}: {} candles stored", sig, inserted);

        let candles = truncate(download.candles, request.since, request.limit, download.interval);
        Ok(outcome(
            candles,
            download.interval,
            download.pages_fetched,
            Some(sig),
        ))
    }

    async fn download(
        &self,
        request: &LoadRequest,
        since: i64,
        target: Target,
        now: i64,
        token: &CancellationToken,
    ) -> Result<Download> {
        let downloader = Downloader::new(
            Arc::clone(&self.source),
            self.config.retry.clone(),
            self.config.verbose,
        );
        downloader
            .download(
                &DownloadRequest {
                    market: &request.market,
                    timeframe: &request.timeframe,
                    since,
                    target,
                    workers: request.workers.unwrap_or(self.config.workers),
                    now,
                },
                token,
            )
            .await
    }
}

/// Cut `series` to the requested window: rows before `since` are skipped, then the limit applies
/// from the first remaining row.
pub fn truncate(series: Vec<Candle>, since: i64, limit: Target, interval: i64) -> Vec<Candle> {
    let mut kept: Vec<Candle> = series
        .into_iter()
        .skip_while(|candle| candle.timestamp < since)
        .collect();

    let keep = match (limit, kept.first()) {
        (_, None) | (Target::Now, _) => kept.len(),
        (Target::Count(count), _) => count,
        (Target::Until(_), Some(first)) => resolve_target(limit, first.timestamp, interval, 0),
    };
    kept.truncate(keep);
    kept
}

fn outcome(
    candles: Vec<Candle>,
    interval: i64,
    fetched_pages: usize,
    signature: Option<String>,
) -> LoadOutcome {
    let missing = integrity_scan(&candles, interval).missing;
    LoadOutcome {
        candles,
        missing,
        fetched_pages,
        signature,
    }
}
