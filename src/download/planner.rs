use crate::fetch::{ProbeResult, RequestDescriptor};

/// How far a download should reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Exactly this many candles.
    Count(usize),
    /// Candles up to this timestamp (ms, exclusive).
    Until(i64),
    /// As many candles as the source has up to the current time.
    Now,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPage {
    pub index: usize,
    pub descriptor: RequestDescriptor,
}

/// Convert a target into a candle count measured from `first_timestamp`.
pub fn resolve_target(target: Target, first_timestamp: i64, interval: i64, now: i64) -> usize {
    match target {
        Target::Count(count) => count,
        Target::Until(end) => candles_between(first_timestamp, end, interval),
        Target::Now => candles_between(first_timestamp, now, interval),
    }
}

fn candles_between(start: i64, end: i64, interval: i64) -> usize {
    if end <= start || interval <= 0 {
        return 0;
    }
    let span = end - start;
    (span / interval + i64::from(span % interval != 0)) as usize
}

/// Lay out the pages still needed after the probe to reach `target_count` candles.
///
/// Each page starts one interval after the predicted last candle of the previous one, so pages
/// never overlap, and planning stops before any page would start after `now`.
pub fn plan(
    probe: &ProbeResult,
    market: &str,
    timeframe: &str,
    target_count: usize,
    now: i64,
) -> Vec<PlannedPage> {
    let page_size = probe.page_size.max(1);
    let step = (page_size as i64 - 1) * probe.interval;

    let mut remaining = target_count.saturating_sub(probe.page.len());
    let mut cursor = probe.last_timestamp();
    let mut pages = Vec::new();

    while remaining > 0 {
        let since = cursor + probe.interval;
        if since > now {
            break;
        }

        pages.push(PlannedPage {
            index: pages.len(),
            descriptor: RequestDescriptor::new(
                market,
                timeframe,
                since,
                remaining.min(page_size),
            ),
        });

        remaining = remaining.saturating_sub(page_size);
        cursor = since + step;
    }

    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::synthetic::series;

    const MINUTE: i64 = 60_000;

    fn probe_of(count: usize, page_size: usize) -> ProbeResult {
        ProbeResult {
            page: series(0, MINUTE, count),
            page_size,
            interval: MINUTE,
        }
    }

    #[test]
    fn resolves_end_date_with_ceiling() {
        assert_eq!(resolve_target(Target::Until(10 * MINUTE), 0, MINUTE, 0), 10);
        assert_eq!(resolve_target(Target::Until(10 * MINUTE + 1), 0, MINUTE, 0), 11);
        assert_eq!(resolve_target(Target::Until(-5), 0, MINUTE, 0), 0);
        assert_eq!(resolve_target(Target::Now, 0, MINUTE, 3 * MINUTE), 3);
        assert_eq!(resolve_target(Target::Count(42), 0, MINUTE, 0), 42);
    }

    #[test]
    fn probe_alone_can_satisfy_target() {
        let probe = probe_of(100, 100);
        assert!(plan(&probe, "BTC/USDT", "1m", 80, i64::MAX).is_empty());
        assert!(plan(&probe, "BTC/USDT", "1m", 100, i64::MAX).is_empty());
    }

    #[test]
    fn pages_are_contiguous_and_non_overlapping() {
        let probe = probe_of(100, 100);

        let pages = plan(&probe, "BTC/USDT", "1m", 350, i64::MAX);

        assert_eq!(pages.len(), 3);
        let starts: Vec<i64> = pages.iter().map(|p| p.descriptor.since).collect();
        assert_eq!(starts, vec![100 * MINUTE, 200 * MINUTE, 300 * MINUTE]);
        let counts: Vec<usize> = pages.iter().map(|p| p.descriptor.count).collect();
        assert_eq!(counts, vec![100, 100, 50]);
        let indices: Vec<usize> = pages.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn never_plans_into_the_future() {
        let probe = probe_of(100, 100);
        let now = 250 * MINUTE;

        let pages = plan(&probe, "BTC/USDT", "1m", 10_000, now);

        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|p| p.descriptor.since <= now));
    }
}
