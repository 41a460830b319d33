//! Cache Persister - best-effort local storage of the last accepted fix.
//!
//! The cache is a head start for the next session, never a substitute for live
//! acquisition. Every failure here is logged and swallowed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::fix::{FixSource, PositionFix};

/// Storage key of the cached fix.
pub const CACHE_KEY: &str = "location_cache";

/// A cached fix older than this is treated as absent.
pub const CACHE_FRESHNESS_MS: i64 = 300_000;

/// Durable local key/value storage. Both operations may fail.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// One JSON file per key under a state directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e).context(format!("reading {}", path.display()))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.path_for(key);
        fs::write(&path, value)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }
}

/// In-memory store; `failing()` makes every write error out.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    fail_writes: bool,
    writes: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    /// Pre-populate a key (e.g. to simulate a previous session).
    pub fn with_entry(self, key: &str, value: &str) -> Self {
        self.entries
            .lock()
            .expect("memory store mutex poisoned")
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("memory store mutex poisoned")
            .get(key)
            .cloned()
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().expect("memory store mutex poisoned")
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes {
            anyhow::bail!("storage quota exceeded");
        }
        self.entries
            .lock()
            .expect("memory store mutex poisoned")
            .insert(key.to_string(), value.to_string());
        *self.writes.lock().expect("memory store mutex poisoned") += 1;
        Ok(())
    }
}

/// What actually lands in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheRecord {
    latitude: f64,
    longitude: f64,
    accuracy_meters: f64,
    acquired_at_epoch_millis: i64,
}

pub struct CachePersister {
    store: Arc<dyn KeyValueStore>,
    key: String,
    freshness_ms: i64,
}

impl CachePersister {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            key: CACHE_KEY.to_string(),
            freshness_ms: CACHE_FRESHNESS_MS,
        }
    }

    pub fn with_freshness_ms(mut self, freshness_ms: i64) -> Self {
        self.freshness_ms = freshness_ms.max(0);
        self
    }

    /// Write `fix` through to storage. Returns whether it was written.
    pub async fn save(&self, fix: &PositionFix) -> bool {
        if !fix.is_valid() {
            return false;
        }
        let record = CacheRecord {
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy_meters: fix.accuracy_meters,
            acquired_at_epoch_millis: fix.acquired_at_epoch_millis,
        };
        let body = match serde_json::to_string(&record) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!("serialize cached fix: {e:#}");
                return false;
            }
        };
        match self.store.set(&self.key, &body).await {
            Ok(()) => true,
            Err(e) => {
                counter!("locator_cache_write_failures_total").increment(1);
                tracing::warn!("write cached fix: {e:#}");
                false
            }
        }
    }

    /// The stored fix if it is younger than the freshness threshold.
    pub async fn load_if_fresh(&self) -> Option<PositionFix> {
        self.load_if_fresh_at(Utc::now().timestamp_millis()).await
    }

    /// Same as [`load_if_fresh`](Self::load_if_fresh) against an explicit clock.
    pub async fn load_if_fresh_at(&self, now_ms: i64) -> Option<PositionFix> {
        let raw = match self.store.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("read cached fix: {e:#}");
                return None;
            }
        };

        let record: CacheRecord = match serde_json::from_str(&raw) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("cached fix corrupted, ignoring: {e}");
                return None;
            }
        };

        let fix = PositionFix::new(
            record.latitude,
            record.longitude,
            Some(record.accuracy_meters),
            record.acquired_at_epoch_millis,
            FixSource::Cached,
        );
        if !fix.is_valid() {
            tracing::warn!("cached fix has invalid coordinates, ignoring");
            return None;
        }

        let age = fix.age_millis(now_ms);
        if age < self.freshness_ms {
            tracing::debug!(age_ms = age, "using cached fix as head start");
            Some(fix)
        } else {
            tracing::debug!(age_ms = age, "cached fix too old");
            None
        }
    }
}
