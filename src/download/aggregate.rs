use std::collections::HashSet;

use crate::fetch::Candle;

/// Result of scanning a series for missing candles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Candles absent between neighbours spaced wider than one interval.
    pub missing: u64,
    /// `(before, after)` timestamps of every irregular step.
    pub gaps: Vec<(i64, i64)>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.gaps.is_empty()
    }
}

/// Assemble the probe page and the fetched pages into one series of at most `target_count`
/// candles, ordered by page index rather than completion order.
pub fn aggregate(
    probe_page: Vec<Candle>,
    mut pages: Vec<(usize, Vec<Candle>)>,
    target_count: usize,
) -> Vec<Candle> {
    pages.sort_by_key(|(index, _)| *index);

    let capacity = probe_page.len() + pages.iter().map(|(_, page)| page.len()).sum::<usize>();
    let mut series = Vec::with_capacity(capacity.min(target_count));
    series.extend(probe_page);
    for (_, page) in pages {
        series.extend(page);
    }
    series.truncate(target_count);

    dedup_ordered(series)
}

/// Append `fresh` to `persisted`, keeping the persisted row whenever both carry a timestamp.
pub fn merge(persisted: Vec<Candle>, fresh: Vec<Candle>) -> Vec<Candle> {
    let mut series = persisted;
    series.extend(fresh);
    dedup_ordered(series)
}

/// Drop repeated timestamps (first occurrence wins) and order by timestamp.
pub fn dedup_ordered(series: Vec<Candle>) -> Vec<Candle> {
    let mut seen = HashSet::with_capacity(series.len());
    let mut unique: Vec<Candle> = series
        .into_iter()
        .filter(|candle| seen.insert(candle.timestamp))
        .collect();
    unique.sort_by_key(|candle| candle.timestamp);
    unique
}

/// Count candles missing from `series` given the expected spacing. Never alters the series.
pub fn integrity_scan(series: &[Candle], interval: i64) -> IntegrityReport {
    let mut report = IntegrityReport::default();
    if interval <= 0 {
        return report;
    }

    for pair in series.windows(2) {
        let (before, after) = (pair[0].timestamp, pair[1].timestamp);
        let delta = after - before;
        if delta == interval {
            continue;
        }
        report.gaps.push((before, after));
        if delta > interval {
            report.missing += (delta / interval - 1) as u64;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::synthetic::{candle, series};

    const MINUTE: i64 = 60_000;

    #[test]
    fn concatenates_by_index_not_arrival() {
        let probe = series(0, MINUTE, 3);
        let pages = vec![
            (1, series(6 * MINUTE, MINUTE, 3)),
            (0, series(3 * MINUTE, MINUTE, 3)),
        ];

        let out = aggregate(probe, pages, 100);

        let stamps: Vec<i64> = out.iter().map(|c| c.timestamp / MINUTE).collect();
        assert_eq!(stamps, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn truncates_to_target_before_dedup() {
        let out = aggregate(series(0, MINUTE, 5), vec![(0, series(5 * MINUTE, MINUTE, 5))], 7);
        assert_eq!(out.len(), 7);
        assert_eq!(out.last().unwrap().timestamp, 6 * MINUTE);
    }

    #[test]
    fn one_row_overlap_appears_once() {
        let probe = series(0, MINUTE, 4);
        let mut overlapping = series(3 * MINUTE, MINUTE, 4);
        overlapping[0].close = -1.0;

        let out = aggregate(probe, vec![(0, overlapping)], 100);

        assert_eq!(out.len(), 7);
        let at_three: Vec<&Candle> = out.iter().filter(|c| c.timestamp == 3 * MINUTE).collect();
        assert_eq!(at_three.len(), 1);
        assert_eq!(at_three[0].close, candle(3 * MINUTE).close);
        assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn merge_prefers_persisted_rows() {
        let persisted = series(0, MINUTE, 3);
        let mut fresh = series(2 * MINUTE, MINUTE, 3);
        fresh[0].volume = 999.0;

        let out = merge(persisted, fresh);

        assert_eq!(out.len(), 5);
        assert_eq!(out[2].volume, 10.0);
    }

    #[test]
    fn counts_missing_candles_without_touching_series() {
        let mut candles = series(0, MINUTE, 5);
        candles.extend(series(9 * MINUTE, MINUTE, 3));

        let report = integrity_scan(&candles, MINUTE);

        assert_eq!(report.missing, 4);
        assert_eq!(report.gaps, vec![(4 * MINUTE, 9 * MINUTE)]);
        assert_eq!(candles.len(), 8);
    }

    #[test]
    fn clean_series_reports_nothing() {
        let report = integrity_scan(&series(0, MINUTE, 50), MINUTE);
        assert!(report.is_clean());
        assert_eq!(report.missing, 0);
    }
}
