// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CACHE_FRESHNESS_MS;
use crate::sources::ipapi::DEFAULT_IP_LOOKUP_URL;
use crate::sources::SensorRequest;

const ENV_PATH: &str = "LOCATOR_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/locator.toml";

/// Service configuration. Every field has a default, so a partial TOML file
/// (or none at all) is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    pub high_accuracy_timeout_ms: u64,
    pub low_accuracy_timeout_ms: u64,
    /// Looser tolerance for remembered sensor results on the fallback request.
    pub low_accuracy_max_age_ms: u64,
    pub watch_timeout_ms: u64,
    pub cache_dir: PathBuf,
    pub cache_freshness_ms: i64,
    pub ip_lookup_url: String,
    /// Base URL of the realtime database; no live broadcast when absent.
    pub live_store_url: Option<String>,
    pub live_store_auth: Option<String>,
    /// Authenticated user; gates the live broadcast.
    pub user_id: Option<String>,
    pub nodes_path: Option<PathBuf>,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            high_accuracy_timeout_ms: 15_000,
            low_accuracy_timeout_ms: 60_000,
            low_accuracy_max_age_ms: 300_000,
            watch_timeout_ms: 30_000,
            cache_dir: PathBuf::from("state"),
            cache_freshness_ms: CACHE_FRESHNESS_MS,
            ip_lookup_url: DEFAULT_IP_LOOKUP_URL.to_string(),
            live_store_url: None,
            live_store_auth: None,
            user_id: None,
            nodes_path: None,
        }
    }
}

impl LocatorConfig {
    /// Load from an explicit TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading locator config from {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("parsing locator config {}", path.display()))
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $LOCATOR_CONFIG_PATH
    /// 2) config/locator.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("LOCATOR_CONFIG_PATH points to non-existent path"));
            }
            Self::load_from_file(&pb)?
        } else if Path::new(DEFAULT_PATH).exists() {
            Self::load_from_file(Path::new(DEFAULT_PATH))?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("HIGH_ACCURACY_TIMEOUT_MS") {
            self.high_accuracy_timeout_ms = v;
        }
        if let Some(v) = env_parse("LOW_ACCURACY_TIMEOUT_MS") {
            self.low_accuracy_timeout_ms = v;
        }
        if let Some(v) = env_parse("LOW_ACCURACY_MAX_AGE_MS") {
            self.low_accuracy_max_age_ms = v;
        }
        if let Some(v) = env_parse("WATCH_TIMEOUT_MS") {
            self.watch_timeout_ms = v;
        }
        if let Some(v) = env_string("LOCATOR_CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = env_string("IP_LOOKUP_URL") {
            self.ip_lookup_url = v;
        }
        if let Some(v) = env_string("LIVE_STORE_URL") {
            self.live_store_url = Some(v);
        }
        if let Some(v) = env_string("LIVE_STORE_AUTH") {
            self.live_store_auth = Some(v);
        }
        if let Some(v) = env_string("LOCATOR_USER_ID") {
            self.user_id = Some(v);
        }
        if let Some(v) = env_string("SAFETY_NODES_PATH") {
            self.nodes_path = Some(PathBuf::from(v));
        }
    }

    pub fn high_accuracy_request(&self) -> SensorRequest {
        SensorRequest::high_accuracy(Duration::from_millis(self.high_accuracy_timeout_ms))
    }

    pub fn low_accuracy_request(&self) -> SensorRequest {
        SensorRequest::low_accuracy(
            Duration::from_millis(self.low_accuracy_timeout_ms),
            Duration::from_millis(self.low_accuracy_max_age_ms),
        )
    }

    pub fn watch_request(&self) -> SensorRequest {
        SensorRequest::high_accuracy(Duration::from_millis(self.watch_timeout_ms))
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_string(key).and_then(|v| v.parse().ok())
}
