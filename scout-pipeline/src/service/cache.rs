//! Time-bounded cache of successful results, keyed by request fingerprint

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::pipeline::PipelineResult;

struct CacheEntry {
    stored_at: Instant,
    result: PipelineResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    /// Entries past their TTL that have not been evicted yet
    pub expired: usize,
    pub ttl_seconds: u64,
}

pub struct ResultCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached result younger than the TTL. An expired entry is evicted.
    pub fn get(&self, key: &str) -> Option<PipelineResult> {
        let mut entries = self.lock();
        let fresh = entries.get(key).map(|e| e.stored_at.elapsed() < self.ttl)?;
        if fresh {
            entries.get(key).map(|e| e.result.clone())
        } else {
            debug!(key, "evicting expired cache entry");
            entries.remove(key);
            None
        }
    }

    /// Store `result`, sweeping out every entry already past the TTL
    pub fn put(&self, key: impl Into<String>, result: PipelineResult) {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, e| e.stored_at.elapsed() < self.ttl);
        if entries.len() < before {
            debug!(evicted = before - entries.len(), "swept expired cache entries");
        }
        entries.insert(
            key.into(),
            CacheEntry {
                stored_at: Instant::now(),
                result,
            },
        );
    }

    /// Drop everything; returns how many entries were removed
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        let expired = entries
            .values()
            .filter(|e| e.stored_at.elapsed() >= self.ttl)
            .count();
        CacheStats {
            entries: entries.len(),
            expired,
            ttl_seconds: self.ttl.as_secs(),
        }
    }
}
