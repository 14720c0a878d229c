use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Tuning knobs for the estimators and the seen ledger. Loaded from a JSON
/// file when one is present; every field has a domain default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum entries kept in the first-seen ledger.
    pub seen_capacity: usize,
    /// A feed-derived rate is trusted only while the feed shows activity
    /// within this many seconds.
    pub freshness_window_s: i64,
    /// Floor for the estimation window, in minutes.
    pub min_window_minutes: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            seen_capacity: 600,
            freshness_window_s: 60,
            min_window_minutes: 0.25,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("invalid config JSON at {}", path.display()))
    }

    /// Resolve a config robustly: ENGINE_CONFIG env var first, then
    /// conventional relative paths, then defaults.
    pub fn resolve() -> Self {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Ok(p) = std::env::var("ENGINE_CONFIG") {
            candidates.push(PathBuf::from(p));
        }
        candidates.push(PathBuf::from("engine.json"));
        candidates.push(PathBuf::from("config/engine.json"));

        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            match Self::load(&candidate) {
                Ok(cfg) => {
                    tracing::info!("loaded engine config from {}", candidate.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!("ignoring config at {}: {:#}", candidate.display(), e);
                }
            }
        }
        EngineConfig::default()
    }
}
