//! Memory-over-disk facade used by the request layer.

use serde::Serialize;
use tracing::debug;

use super::disk::DiskCache;
use super::key::CacheKey;
use super::memory::MemoryCache;
use super::traits::{CacheStats, CacheTier};
use crate::analysis::CachedAnalysis;
use crate::error::CoreResult;

/// Both cache tiers, consulted memory first.
///
/// Constructed once at startup and shared by handlers; there is no global
/// instance.
pub struct TieredCache {
    memory: MemoryCache<CachedAnalysis>,
    disk: DiskCache,
}

/// Snapshot of both tiers for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct TieredCacheInfo {
    pub memory: CacheStats,
    pub memory_ttl_secs: u64,
    pub memory_max_entries: usize,
    pub disk: CacheStats,
    pub disk_ttl_secs: u64,
    pub disk_dir: String,
}

/// Counts removed by a purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub memory_entries: usize,
    pub disk_files: usize,
}

impl TieredCache {
    pub fn new(memory: MemoryCache<CachedAnalysis>, disk: DiskCache) -> Self {
        Self { memory, disk }
    }

    pub fn memory(&self) -> &MemoryCache<CachedAnalysis> {
        &self.memory
    }

    pub fn disk(&self) -> &DiskCache {
        &self.disk
    }

    /// Fresh entry for `key`, memory first. A disk hit is copied into memory.
    pub async fn lookup(&self, key: &CacheKey) -> Option<(CachedAnalysis, CacheTier)> {
        if let Some(hit) = self.memory.get(key) {
            debug!(key = %key, "Memory cache hit");
            return Some((hit, CacheTier::Memory));
        }

        let hit: CachedAnalysis = self.disk.read(key).await?;
        debug!(key = %key, "Disk cache hit");
        self.memory.set(key.clone(), hit.clone());
        Some((hit, CacheTier::Disk))
    }

    /// Commit recorded for whatever entry currently sits under `key`.
    ///
    /// Looks at memory regardless of age so that an expired-but-present alias
    /// is still recognised as superseded.
    pub async fn current_commit(&self, key: &CacheKey) -> Option<String> {
        if let Some(entry) = self.memory.peek(key) {
            return entry.commit;
        }
        let entry: CachedAnalysis = self.disk.peek(key).await?;
        entry.commit
    }

    /// Write `value` to both tiers. Disk failures are logged and ignored.
    pub async fn store(&self, key: &CacheKey, value: &CachedAnalysis) {
        self.memory.set(key.clone(), value.clone());
        self.disk.write(key, value).await;
    }

    /// Write `value` only when neither tier holds a fresh entry for `key`.
    ///
    /// A fresh disk entry missing from memory is copied up unchanged. Returns
    /// whether `value` was written.
    pub async fn store_if_absent(&self, key: &CacheKey, value: &CachedAnalysis) -> bool {
        if self.memory.contains_fresh(key) {
            return false;
        }
        if let Some(existing) = self.disk.peek::<CachedAnalysis>(key).await {
            self.memory.set(key.clone(), existing);
            return false;
        }
        self.store(key, value).await;
        true
    }

    /// Remove `key` from both tiers.
    pub async fn invalidate(&self, key: &CacheKey) {
        let in_memory = self.memory.delete(key);
        let on_disk = self.disk.delete(key).await;
        debug!(key = %key, in_memory, on_disk, "Invalidated cache entry");
    }

    /// Drop everything in both tiers.
    pub async fn purge(&self) -> CoreResult<PurgeReport> {
        let memory_entries = self.memory.clear();
        let disk_files = self.disk.purge().await?;
        Ok(PurgeReport {
            memory_entries,
            disk_files,
        })
    }

    pub async fn info(&self) -> TieredCacheInfo {
        TieredCacheInfo {
            memory: self.memory.stats(),
            memory_ttl_secs: self.memory.ttl().as_secs(),
            memory_max_entries: self.memory.max_entries(),
            disk: self.disk.stats().await,
            disk_ttl_secs: self.disk.ttl().as_secs(),
            disk_dir: self.disk.dir().display().to_string(),
        }
    }
}
