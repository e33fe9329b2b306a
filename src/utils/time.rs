use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::download::Target;
use crate::error::{AppError, Result};

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse a UTC date (`2023-01-01 00:00:00` or `2023-01-01`) or raw epoch milliseconds.
pub fn parse_timestamp(value: &str) -> Result<i64> {
    let trimmed = value.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return trimmed
            .parse::<i64>()
            .map_err(|_| AppError::InvalidDate(value.to_string()));
    }

    if let Ok(datetime) = NaiveDateTime::parse_from_str(trimmed, DATETIME_FORMAT) {
        return Ok(datetime.and_utc().timestamp_millis());
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|datetime| datetime.and_utc().timestamp_millis())
        .ok_or_else(|| AppError::InvalidDate(value.to_string()))
}

/// Parse a limit: `-1` means up to now, a positive integer is a candle count, anything else is
/// read as an end date.
pub fn parse_limit(value: &str) -> Result<Target> {
    let trimmed = value.trim();
    if trimmed == "-1" {
        return Ok(Target::Now);
    }
    if let Ok(count) = trimmed.parse::<i64>() {
        return match usize::try_from(count) {
            Ok(count) if count > 0 => Ok(Target::Count(count)),
            _ => Err(AppError::InvalidLimit(value.to_string())),
        };
    }
    parse_timestamp(trimmed)
        .map(Target::Until)
        .map_err(|_| AppError::InvalidLimit(value.to_string()))
}

pub fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format(DATETIME_FORMAT).to_string())
        .unwrap_or_else(|| millis.to_string())
}
