use crate::error::{AppError, Result};

use super::{EngineConfig, RetryPolicy};

/// Validate an engine configuration, reporting every problem at once.
pub fn validate_config(config: &EngineConfig) -> Result<()> {
    let mut issues = Vec::new();

    if config.workers == 0 {
        issues.push("workers must be at least 1".to_string());
    }
    if let Some(dir) = &config.store_dir {
        if dir.as_os_str().is_empty() {
            issues.push("store_dir must not be empty, use null to disable persistence".to_string());
        }
    }
    if config.deadline_secs == Some(0) {
        issues.push("deadline_secs must be positive when set".to_string());
    }
    if let Some(id) = &config.exchange_id {
        if id.trim().is_empty() {
            issues.push("exchange_id must not be blank".to_string());
        }
    }
    validate_retry(&config.retry, &mut issues);

    if issues.is_empty() {
        Ok(())
    } else {
        Err(AppError::message(format!(
            "engine config invalid:\n  - {}",
            issues.join("\n  - ")
        )))
    }
}

fn validate_retry(retry: &RetryPolicy, issues: &mut Vec<String>) {
    if retry.cooldown_secs == 0 {
        issues.push("retry.cooldown_secs must be positive".to_string());
    }
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        issues.push(format!(
            "retry.multiplier must be a finite number >= 1.0, got {}",
            retry.multiplier
        ));
    }
    if retry.max_cooldown_secs < retry.cooldown_secs {
        issues.push(format!(
            "retry.max_cooldown_secs ({}) is below retry.cooldown_secs ({})",
            retry.max_cooldown_secs, retry.cooldown_secs
        ));
    }
    if retry.max_attempts == Some(0) {
        issues.push("retry.max_attempts must be positive, use null to retry forever".to_string());
    }
}
