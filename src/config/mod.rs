pub mod loader;
pub mod validator;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fetch::DEFAULT_WORKERS;

pub use loader::load_config;
pub use validator::validate_config;

/// How fetch workers back off when the source pushes back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub cooldown_secs: u64,
    /// Growth factor per consecutive trip. `1.0` keeps a fixed window.
    pub multiplier: f64,
    pub max_cooldown_secs: u64,
    /// Attempts per page before the run fails. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            cooldown_secs: 60,
            multiplier: 2.0,
            max_cooldown_secs: 600,
            max_attempts: Some(20),
        }
    }
}

impl RetryPolicy {
    pub fn cooldown_for(&self, trips: u32) -> Duration {
        let exponent = trips.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.cooldown_secs as f64 * self.multiplier.powi(exponent);
        let capped = if secs.is_finite() {
            secs.min(self.max_cooldown_secs as f64)
        } else {
            self.max_cooldown_secs as f64
        };
        Duration::from_secs_f64(capped.max(0.0))
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(false, |max| attempts >= max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub workers: usize,
    /// Dataset directory. `None` disables persistence.
    pub store_dir: Option<PathBuf>,
    pub verbose: bool,
    /// Upper bound on one whole load call.
    pub deadline_secs: Option<u64>,
    /// Overrides the source id used in dataset signatures.
    pub exchange_id: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            store_dir: Some(PathBuf::from("data")),
            verbose: true,
            deadline_secs: None,
            exchange_id: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}
