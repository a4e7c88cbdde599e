use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Context, Result};

/// Payload persisted per cache key. `synthetic` marks data that did not come
/// from the live upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedPayload {
    pub timestamp_ms: i64,
    pub payload: Value,
    pub synthetic: bool,
}

/// Optional file-backed store behind the response cache, for warm starts
/// across processes. Entries expire after the freshness window; reads and
/// writes are best-effort and never fail the caller.
pub struct DurableCache {
    dir: PathBuf,
    ttl: Duration,
}

impl DurableCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
        Ok(Self { dir, ttl })
    }

    /// Look up a key. Returns the entry's age and payload, or `None` when the
    /// entry is missing, expired, or unreadable.
    pub fn get(&self, key: &str) -> Option<(Duration, Value)> {
        let path = self.path_for(key);
        let raw = fs::read_to_string(&path).ok()?;
        let cached: CachedPayload = match serde_json::from_str(&raw) {
            Ok(cached) => cached,
            Err(err) => {
                log::warn!("discarding unreadable cache file {}: {err}", path.display());
                let _ = fs::remove_file(&path);
                return None;
            }
        };

        let age_ms = Utc::now().timestamp_millis() - cached.timestamp_ms;
        if age_ms < 0 {
            return None;
        }
        let age = Duration::from_millis(age_ms as u64);
        if age > self.ttl {
            return None;
        }
        Some((age, cached.payload))
    }

    /// Persist a payload under a key. Errors are logged, not surfaced; the
    /// in-memory cache stays correct without durability.
    pub fn put(&self, key: &str, payload: &Value, synthetic: bool) {
        let cached = CachedPayload {
            timestamp_ms: Utc::now().timestamp_millis(),
            payload: payload.clone(),
            synthetic,
        };

        let path = self.path_for(key);
        let write = serde_json::to_string(&cached)
            .map_err(anyhow::Error::from)
            .and_then(|body| fs::write(&path, body).map_err(anyhow::Error::from));
        if let Err(err) = write {
            log::warn!("failed to persist cache entry {}: {err}", path.display());
        }
    }

    /// File name derived from the key: readable prefix plus a hash suffix so
    /// distinct keys never collide after sanitising.
    fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .take(64)
            .collect();
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        self.dir
            .join(format!("{sanitized}_{:016x}.json", hasher.finish()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
