use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::download::limiter::RateLimiter;
use crate::download::planner::PlannedPage;
use crate::error::{AppError, Result};
use crate::fetch::{ensure_worker_count, Candle, CandleSource};

/// Split `pages` round-robin over at most `workers` buckets.
pub fn distribute(pages: Vec<PlannedPage>, workers: usize) -> Vec<Vec<PlannedPage>> {
    let buckets = ensure_worker_count(workers).min(pages.len());
    let mut jobs: Vec<Vec<PlannedPage>> = (0..buckets).map(|_| Vec::new()).collect();
    for (position, page) in pages.into_iter().enumerate() {
        jobs[position % buckets].push(page);
    }
    jobs
}

/// Fixed set of fetch workers sharing one [`RateLimiter`].
pub struct WorkerPool {
    source: Arc<dyn CandleSource>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    workers: usize,
}

impl WorkerPool {
    pub fn new(
        source: Arc<dyn CandleSource>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        workers: usize,
    ) -> Self {
        Self {
            source,
            limiter,
            retry,
            workers: ensure_worker_count(workers),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetch every planned page. Results come back ordered by page index, whatever order the
    /// workers finished in. The first permanent failure cancels the remaining workers.
    pub async fn run(
        &self,
        pages: Vec<PlannedPage>,
        token: &CancellationToken,
    ) -> Result<Vec<(usize, Vec<Candle>)>> {
        let total = pages.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let jobs = distribute(pages, self.workers);
        info!("fetching {} pages with {} workers", total, jobs.len());

        // child token so a failing worker stops its siblings without touching the caller's token
        let run_token = token.child_token();
        let monitor = {
            let limiter = Arc::clone(&self.limiter);
            let token = run_token.clone();
            tokio::spawn(async move { limiter.monitor(token).await })
        };

        let (tx, mut rx) = mpsc::channel::<(usize, Vec<Candle>)>(total);
        let mut handles = Vec::with_capacity(jobs.len());
        for job in jobs {
            let worker = Worker {
                source: Arc::clone(&self.source),
                limiter: Arc::clone(&self.limiter),
                retry: self.retry.clone(),
                token: run_token.clone(),
                tx: tx.clone(),
                total,
            };
            handles.push(tokio::spawn(async move { worker.run(job).await }));
        }
        drop(tx);

        let mut slots: Vec<Option<Vec<Candle>>> = vec![None; total];
        while let Some((index, candles)) = rx.recv().await {
            slots[index] = Some(candles);
        }

        let mut failure = None;
        for joined in join_all(handles).await {
            // a panicked worker is a failure like any other, the monitor still has to stop
            if let Err(err) = joined.map_err(AppError::from).and_then(|outcome| outcome) {
                if failure.is_none() || matches!(failure, Some(AppError::Cancelled)) {
                    failure = Some(err);
                }
            }
        }

        run_token.cancel();
        monitor.await?;

        if let Some(err) = failure {
            return Err(err);
        }

        let mut results = Vec::with_capacity(total);
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(candles) => results.push((index, candles)),
                None => {
                    return Err(AppError::message(format!(
                        "page {index} finished without a result"
                    )))
                }
            }
        }
        Ok(results)
    }
}

struct Worker {
    source: Arc<dyn CandleSource>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    token: CancellationToken,
    tx: mpsc::Sender<(usize, Vec<Candle>)>,
    total: usize,
}

impl Worker {
    async fn run(self, job: Vec<PlannedPage>) -> Result<()> {
        let outcome = self.fetch_all(job).await;
        if outcome.is_err() {
            self.token.cancel();
        }
        outcome
    }

    async fn fetch_all(&self, job: Vec<PlannedPage>) -> Result<()> {
        for page in job {
            let candles = self.fetch_with_retry(&page).await?;
            self.limiter.record_completion(page.index);
            debug!(
                "page {}/{} fetched ({} candles, {} done)",
                page.index + 1,
                self.total,
                candles.len(),
                self.limiter.completed()
            );
            if self.tx.send((page.index, candles)).await.is_err() {
                return Err(AppError::Cancelled);
            }
        }
        Ok(())
    }

    async fn fetch_with_retry(&self, page: &PlannedPage) -> Result<Vec<Candle>> {
        let mut attempts = 0u32;
        loop {
            self.limiter.wait_clear(&self.token).await?;

            attempts += 1;
            let err = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(AppError::Cancelled),
                res = self.source.fetch_page(&page.descriptor) => match res {
                    Ok(candles) => return Ok(candles),
                    Err(err) => err,
                },
            };

            if !err.is_retryable() {
                warn!("page {} failed permanently: {}", page.index, err);
                return Err(AppError::Source(err));
            }
            if self.retry.exhausted(attempts) {
                warn!(
                    "page {} gave up after {} attempts: {}",
                    page.index, attempts, err
                );
                return Err(AppError::RetriesExhausted {
                    index: page.index,
                    attempts,
                    last: err,
                });
            }

            debug!(
                "page {} attempt {} failed ({}), waiting for cooldown",
                page.index, attempts, err
            );
            self.limiter.trip();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::planner::{plan, PlannedPage};
    use crate::fetch::synthetic::SyntheticSource;
    use crate::fetch::{probe, RequestDescriptor, SourceError};

    const MINUTE: i64 = 60_000;

    fn pages(count: usize) -> Vec<PlannedPage> {
        (0..count)
            .map(|index| PlannedPage {
                index,
                descriptor: RequestDescriptor::new("BTC/USDT", "1m", index as i64 * MINUTE, 1),
            })
            .collect()
    }

    fn pool(source: Arc<SyntheticSource>, retry: RetryPolicy, workers: usize) -> WorkerPool {
        let limiter = Arc::new(RateLimiter::new(retry.clone(), false));
        WorkerPool::new(source, limiter, retry, workers)
    }

    #[test]
    fn distributes_round_robin() {
        let jobs = distribute(pages(7), 3);

        assert_eq!(jobs.len(), 3);
        let indices: Vec<Vec<usize>> = jobs
            .iter()
            .map(|job| job.iter().map(|p| p.index).collect())
            .collect();
        assert_eq!(indices, vec![vec![0, 3, 6], vec![1, 4], vec![2, 5]]);
    }

    #[test]
    fn never_spawns_more_buckets_than_pages() {
        assert_eq!(distribute(pages(2), 100).len(), 2);
        assert_eq!(distribute(pages(5), 0).len(), 1);
    }

    #[tokio::test]
    async fn returns_results_in_page_order() {
        let source = Arc::new(SyntheticSource::contiguous(0, MINUTE, 5_000).with_page_size(100));
        let probe = probe(source.as_ref(), "BTC/USDT", "1m", 0).await.unwrap();
        let planned = plan(&probe, "BTC/USDT", "1m", 2_000, i64::MAX);
        let pool = pool(Arc::clone(&source), RetryPolicy::default(), 7);

        let results = pool.run(planned, &CancellationToken::new()).await.unwrap();

        assert_eq!(results.len(), 19);
        for (position, (index, candles)) in results.iter().enumerate() {
            assert_eq!(*index, position);
            assert_eq!(candles[0].timestamp, (100 + position as i64 * 100) * MINUTE);
        }
        assert_eq!(pool.limiter().completed(), 19);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_through_the_limiter() {
        let source = Arc::new(
            SyntheticSource::contiguous(0, MINUTE, 100)
                .failing_first(3, SourceError::RateLimited("429".into())),
        );
        let pool = pool(Arc::clone(&source), RetryPolicy::default(), 4);

        let results = pool.run(pages(4), &CancellationToken::new()).await.unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(source.calls(), 7);
        assert!(!pool.limiter().is_throttled());
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_retries_surface_an_error() {
        let source = Arc::new(
            SyntheticSource::contiguous(0, MINUTE, 100)
                .failing_with(SourceError::Transient("timeout".into())),
        );
        let retry = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        let pool = pool(source, retry, 1);

        let err = pool.run(pages(2), &CancellationToken::new()).await.unwrap_err();

        assert!(
            matches!(err, AppError::RetriesExhausted { index: 0, attempts: 3, .. }),
            "{err}"
        );
    }

    #[tokio::test]
    async fn permanent_errors_abort_without_retry() {
        let source = Arc::new(
            SyntheticSource::contiguous(0, MINUTE, 100)
                .failing_with(SourceError::Permanent("invalid symbol".into())),
        );
        let pool = pool(Arc::clone(&source), RetryPolicy::default(), 1);

        let err = pool.run(pages(3), &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, AppError::Source(SourceError::Permanent(_))));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn panicking_worker_fails_the_run_and_stops_the_monitor() {
        let source = Arc::new(
            SyntheticSource::contiguous(0, MINUTE, 100)
                .with_page_size(1)
                .panicking_at(1),
        );
        let pool = pool(Arc::clone(&source), RetryPolicy::default(), 2);

        let err = pool.run(pages(4), &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(&err, AppError::Join(join) if join.is_panic()), "{err}");
    }

    #[tokio::test]
    async fn caller_cancellation_stops_the_run() {
        let source = Arc::new(
            SyntheticSource::contiguous(0, MINUTE, 100)
                .failing_with(SourceError::RateLimited("429".into())),
        );
        let pool = pool(source, RetryPolicy::default(), 2);
        let token = CancellationToken::new();
        token.cancel();

        let err = pool.run(pages(2), &token).await.unwrap_err();

        assert!(matches!(err, AppError::Cancelled));
    }
}
