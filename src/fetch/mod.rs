pub mod binance;
pub mod probe;
pub mod source;

#[cfg(test)]
pub(crate) mod synthetic;

pub use binance::BinanceSource;
pub use probe::{probe, ProbeResult};
pub use source::{Candle, CandleSource, RequestDescriptor, SourceError};

/// Default number of concurrent page fetchers.
pub const DEFAULT_WORKERS: usize = 100;

#[inline]
pub fn ensure_worker_count(workers: usize) -> usize {
    workers.max(1)
}
