use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::error::{AppError, Result};

/// Throttle coordination shared by every fetch worker of one download.
///
/// A failing worker trips the flag and parks in [`RateLimiter::wait_clear`]; the single
/// [`RateLimiter::monitor`] task counts the cooldown down and clears the flag, releasing every
/// parked worker at once. No worker fetches while the flag is set.
pub struct RateLimiter {
    throttled: watch::Sender<bool>,
    completed: AtomicUsize,
    // highest completed page index + 1, 0 while nothing completed
    frontier: AtomicUsize,
    consecutive_trips: AtomicU32,
    policy: RetryPolicy,
    verbose: bool,
}

impl RateLimiter {
    pub fn new(policy: RetryPolicy, verbose: bool) -> Self {
        let (throttled, _) = watch::channel(false);
        Self {
            throttled,
            completed: AtomicUsize::new(0),
            frontier: AtomicUsize::new(0),
            consecutive_trips: AtomicU32::new(0),
            policy,
            verbose,
        }
    }

    pub fn is_throttled(&self) -> bool {
        *self.throttled.borrow()
    }

    /// Raise the throttle flag. Tripping an already raised flag is a no-op.
    pub fn trip(&self) {
        self.throttled.send_if_modified(|flag| {
            if *flag {
                return false;
            }
            // counted before waking the monitor so it sizes the cooldown for this trip
            self.consecutive_trips.fetch_add(1, Ordering::SeqCst);
            *flag = true;
            true
        });
    }

    /// Block until the throttle flag is clear or `token` is cancelled.
    pub async fn wait_clear(&self, token: &CancellationToken) -> Result<()> {
        let mut rx = self.throttled.subscribe();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(AppError::Cancelled),
            res = rx.wait_for(|flag| !*flag) => res.map(|_| ()).map_err(|_| AppError::Cancelled),
        }
    }

    /// Record a successfully fetched page.
    pub fn record_completion(&self, index: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.frontier.fetch_max(index + 1, Ordering::SeqCst);
        self.consecutive_trips.store(0, Ordering::SeqCst);
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Highest page index fetched so far. Progress reporting only.
    pub fn highest_completed(&self) -> Option<usize> {
        self.frontier.load(Ordering::SeqCst).checked_sub(1)
    }

    /// Cooldown for the current streak of trips without a completed page in between.
    pub fn current_cooldown(&self) -> Duration {
        self.policy
            .cooldown_for(self.consecutive_trips.load(Ordering::SeqCst))
    }

    /// Cooldown loop. Runs until `token` is cancelled.
    pub async fn monitor(&self, token: CancellationToken) {
        let mut rx = self.throttled.subscribe();

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                res = rx.wait_for(|flag| *flag) => {
                    if res.is_err() {
                        return;
                    }
                }
            }

            let cooldown = self.current_cooldown();
            match self.highest_completed() {
                Some(page) => warn!(
                    "rate limit reached after {} pages (furthest page {}), pausing fetchers for {}s",
                    self.completed(),
                    page,
                    cooldown.as_secs()
                ),
                None => warn!(
                    "rate limit reached before any page completed, pausing fetchers for {}s",
                    cooldown.as_secs()
                ),
            }

            let mut remaining = cooldown;
            while !remaining.is_zero() {
                if self.verbose {
                    info!("rate limit cooldown: {}s remaining", remaining.as_secs());
                } else {
                    debug!("rate limit cooldown: {}s remaining", remaining.as_secs());
                }
                let tick = remaining.min(Duration::from_secs(1));
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(tick) => {}
                }
                remaining -= tick;
            }

            self.throttled.send_replace(false);
            debug!("rate limit cleared, resuming fetchers");
        }
    }
}
