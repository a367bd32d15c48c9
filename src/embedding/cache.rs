//! Two-tier embedding cache.
//!
//! L1 is a bounded in-memory cache keyed by the MD5 of the input text; L2 is
//! a content-addressed directory with one file per key holding the raw
//! little-endian f32 bytes of the vector. Reads go L1 → L2 → miss; writes go
//! L1 then L2 best-effort (a failed disk write is logged, never fatal).
//! Concurrent misses on the same key may compute redundantly; the second
//! writer overwrites with an equal value.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use md5::{Digest, Md5};
use moka::sync::Cache;
use serde::Serialize;

use crate::vector::{bytes_to_vector, vector_to_bytes};

pub struct EmbeddingCache {
    l1: Cache<String, Arc<Vec<f32>>>,
    dir: PathBuf,
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub misses: u64,
    pub l1_entries: u64,
}

impl EmbeddingCache {
    /// `capacity` entries in L1 with the given TTL; `dir` is created on
    /// first use.
    pub fn new(dir: impl Into<PathBuf>, capacity: u64, ttl: Duration) -> Self {
        let l1 = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(ttl)
            .build();
        Self {
            l1,
            dir: dir.into(),
            l1_hits: AtomicU64::new(0),
            l2_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cache key for an input text: lowercase hex MD5.
    pub fn key(text: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(text.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a vector, promoting L2 hits into L1.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<f32>>> {
        if let Some(vector) = self.l1.get(key) {
            self.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Some(vector);
        }

        match self.read_disk(key) {
            Some(vector) => {
                self.l2_hits.fetch_add(1, Ordering::Relaxed);
                let vector = Arc::new(vector);
                self.l1.insert(key.to_string(), Arc::clone(&vector));
                Some(vector)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a freshly computed vector in both tiers.
    pub fn put(&self, key: &str, vector: Vec<f32>) -> Arc<Vec<f32>> {
        let vector = Arc::new(vector);
        self.l1.insert(key.to_string(), Arc::clone(&vector));
        self.write_disk(key, &vector);
        vector
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            l1_entries: self.l1.entry_count(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn read_disk(&self, key: &str) -> Option<Vec<f32>> {
        let bytes = std::fs::read(self.path_for(key)).ok()?;
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            tracing::warn!(key, len = bytes.len(), "corrupt embedding cache file, ignoring");
            return None;
        }
        Some(bytes_to_vector(&bytes))
    }

    fn write_disk(&self, key: &str, vector: &[f32]) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "embedding cache dir unavailable");
            return;
        }
        if let Err(e) = std::fs::write(self.path_for(key), vector_to_bytes(vector)) {
            tracing::warn!(key, error = %e, "embedding cache disk write failed");
        }
    }
}
