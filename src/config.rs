// src/config.rs
//! Process configuration for the engine (pool sizes, scan pacing, vote
//! lifetime, cache TTL). Guild-level behaviour lives in `settings`.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PATH: &str = "REPUTATION_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent event handlers.
    pub workers: usize,
    pub scan: ScanConfig,
    pub vote: VoteConfig,
    pub context: ContextConfig,
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            scan: ScanConfig::default(),
            vote: VoteConfig::default(),
            context: ContextConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Spacing between batch starts.
    pub interval_ms: u64,
    pub batch_size: usize,
    /// Simultaneous scans across all guilds.
    pub max_jobs: usize,
    pub max_budget: usize,
    pub default_budget: usize,
    pub fetch_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            batch_size: 100,
            max_jobs: 10,
            max_budget: 100_000,
            default_budget: 30_000,
            fetch_timeout_secs: 10,
        }
    }
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    /// Requested budget clamped to `[1, max_budget]`; `None` → default.
    pub fn budget(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_budget)
            .clamp(1, self.max_budget.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoteConfig {
    pub duration_secs: u64,
    pub max_candidates: usize,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            duration_secs: 60,
            max_candidates: 10,
        }
    }
}

impl VoteConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Messages read per context lookup.
    pub history_limit: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { history_limit: 100 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub seen_ttl_minutes: i64,
    pub eviction_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            seen_ttl_minutes: 15,
            eviction_interval_secs: 60,
        }
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<EngineConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading engine config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing engine config {}", path.display()))
}

/// Load config using env var + fallbacks:
/// 1) $REPUTATION_CONFIG_PATH
/// 2) config/reputation.toml
/// 3) config/reputation.json
/// 4) defaults
pub fn load_config_default() -> Result<EngineConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        }
        return Err(anyhow!("{ENV_PATH} points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/reputation.toml");
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/reputation.json");
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    Ok(EngineConfig::default())
}

fn parse_config(s: &str, hint_ext: &str) -> Result<EngineConfig> {
    if hint_ext == "json" || (hint_ext != "toml" && s.trim_start().starts_with('{')) {
        return serde_json::from_str(s).map_err(|e| anyhow!("invalid JSON config: {e}"));
    }
    toml::from_str(s).map_err(|e| anyhow!("invalid TOML config: {e}"))
}
