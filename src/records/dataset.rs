use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Context, Result};
use crate::fetch::Candle;

pub const CSV_HEADER: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// Describes one persisted series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub signature: String,
    pub exchange_id: String,
    pub market: String,
    pub timeframe: String,
    /// Start of the first download, epoch ms.
    pub since: i64,
    /// Newest persisted candle. `None` while the dataset is empty.
    pub last_timestamp: Option<i64>,
    /// Candle spacing observed when the dataset was created.
    pub interval: i64,
}

impl DatasetMetadata {
    pub fn new(
        exchange_id: &str,
        market: &str,
        timeframe: &str,
        since: i64,
        interval: i64,
    ) -> Self {
        Self {
            signature: signature(exchange_id, market, timeframe),
            exchange_id: exchange_id.to_string(),
            market: market.to_string(),
            timeframe: timeframe.to_string(),
            since,
            last_timestamp: None,
            interval,
        }
    }
}

/// Stable dataset key: the first 16 hex characters of SHA-256 over source, market and timeframe.
pub fn signature(exchange_id: &str, market: &str, timeframe: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(exchange_id.as_bytes());
    hasher.update(market.as_bytes());
    hasher.update(timeframe.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// Write `candles` as CSV with a header row, even when there are no candles.
pub fn write_candles<P: AsRef<Path>>(path: P, candles: &[Candle]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV writer for {}", path.display()))?;
    writer.write_record(CSV_HEADER)?;
    for candle in candles {
        writer.write_record(&[
            candle.timestamp.to_string(),
            candle.open.to_string(),
            candle.high.to_string(),
            candle.low.to_string(),
            candle.close.to_string(),
            candle.volume.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_candles<P: AsRef<Path>>(path: P) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut candles = Vec::new();
    for record in reader.deserialize::<Candle>() {
        candles.push(record?);
    }
    Ok(candles)
}
