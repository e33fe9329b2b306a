use std::{fs, path::Path};

use crate::error::{Context, Result};

use super::{validator, EngineConfig};

/// Load an engine configuration from JSON. Missing fields fall back to their defaults.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("failed to read engine config JSON at {}", path.display()))?;

    let config = parse_config(&json)
        .with_context(|| format!("failed to parse engine config JSON at {}", path.display()))?;

    validator::validate_config(&config)?;

    Ok(config)
}

fn parse_config(json: &str) -> serde_json::Result<EngineConfig> {
    if json.trim().is_empty() {
        return Ok(EngineConfig::default());
    }
    serde_json::from_str(json)
}
