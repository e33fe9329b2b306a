use thiserror::Error;

use crate::fetch::SourceError;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error("not enough data for {market} {timeframe}: {reason}")]
    InsufficientData {
        market: String,
        timeframe: String,
        reason: String,
    },
    #[error("dataset {0} already exists")]
    DuplicateDataset(String),
    #[error("dataset {0} not found")]
    DatasetNotFound(String),
    #[error("invalid date `{0}`, expected \"YYYY-MM-DD HH:MM:SS\", \"YYYY-MM-DD\" or epoch milliseconds")]
    InvalidDate(String),
    #[error("invalid limit `{0}`, expected a positive count, an end date or -1")]
    InvalidLimit(String),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("page {index} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        index: usize,
        attempts: u32,
        last: SourceError,
    },
    #[error("load did not finish within {0:?}")]
    Timeout(std::time::Duration),
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        AppError::Message(msg.into())
    }

    pub fn insufficient_data(market: &str, timeframe: &str, reason: impl Into<String>) -> Self {
        AppError::InsufficientData {
            market: market.to_string(),
            timeframe: timeframe.to_string(),
            reason: reason.into(),
        }
    }
}
