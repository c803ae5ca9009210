//! Content-addressed persistent cache tier.
//!
//! Each key is stored in `<dir>/<sha256(key)>.json`. Freshness is judged from
//! the file's modification time when it is read; the read that finds a stale
//! file deletes it. Nothing sweeps the directory in the background.
//!
//! The tier is best-effort: failed writes are logged and swallowed, and
//! unreadable files are treated as misses.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use super::key::CacheKey;
use super::traits::CacheStats;
use crate::error::{CacheError, CoreResult};

const CACHE_FILE_EXTENSION: &str = "json";

/// Disk cache tier rooted at a single directory.
pub struct DiskCache {
    dir: PathBuf,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create the cache directory if needed.
    pub async fn ensure_dir(&self) -> CoreResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CacheError::io(&self.dir, &e).into())
    }

    /// Filesystem location for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        let digest = Sha256::digest(key.as_str().as_bytes());
        self.dir
            .join(format!("{}.{}", hex::encode(digest), CACHE_FILE_EXTENSION))
    }

    /// Read a fresh payload for `key`. Stale files are deleted.
    pub async fn read<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let path = self.path_for(key);
        let found = self.read_path(key, &path).await;
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Like `read`, but not counted in the hit/miss stats.
    pub async fn peek<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.read_path(key, &self.path_for(key)).await
    }

    async fn read_path<T: DeserializeOwned>(&self, key: &CacheKey, path: &Path) -> Option<T> {
        let metadata = match fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                debug!(key = %key, error = %e, "Disk cache stat failed");
                return None;
            }
        };

        if self.is_expired(metadata.modified().ok()) {
            debug!(key = %key, path = %path.display(), "Disk cache entry expired");
            if let Err(e) = fs::remove_file(path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(key = %key, error = %e, "Failed to delete expired cache file");
                }
            }
            return None;
        }

        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(key = %key, error = %e, "Disk cache read failed");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt disk cache entry ignored");
                None
            }
        }
    }

    fn is_expired(&self, modified: Option<SystemTime>) -> bool {
        match modified {
            // Files stamped in the future count as fresh.
            Some(mtime) => match SystemTime::now().duration_since(mtime) {
                Ok(age) => age >= self.ttl,
                Err(_) => false,
            },
            None => true,
        }
    }

    /// Persist `payload` under `key`. Failures are logged, never returned.
    pub async fn write<T: Serialize>(&self, key: &CacheKey, payload: &T) {
        if let Err(e) = self.try_write(key, payload).await {
            warn!(key = %key, error = %e, "Disk cache write failed");
        }
    }

    /// Persist `payload` under `key`, reporting failures.
    ///
    /// Writes go to a temporary sibling first and are renamed into place, so a
    /// concurrent reader never observes a partial file.
    pub async fn try_write<T: Serialize>(&self, key: &CacheKey, payload: &T) -> CoreResult<()> {
        let bytes = serde_json::to_vec(payload).map_err(CacheError::from)?;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CacheError::io(&self.dir, &e))?;

        let path = self.path_for(key);
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        if let Err(e) = fs::write(&tmp, &bytes).await {
            return Err(CacheError::io(&tmp, &e).into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(CacheError::io(&path, &e).into());
        }
        Ok(())
    }

    /// Remove the file for `key`. Returns whether one existed.
    pub async fn delete(&self, key: &CacheKey) -> bool {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to delete cache file");
                false
            }
        }
    }

    /// Remove every cache file in the directory. Returns how many were removed.
    pub async fn purge(&self) -> CoreResult<usize> {
        let mut removed = 0;
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io(&self.dir, &e).into()),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&self.dir, &e))?
        {
            let path = entry.path();
            if !is_cache_file(&path) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to purge cache file"),
            }
        }
        Ok(removed)
    }

    /// File count and total size of the cache directory.
    pub async fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ..Default::default()
        };

        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return stats;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if !is_cache_file(&entry.path()) {
                continue;
            }
            if let Ok(metadata) = entry.metadata().await {
                stats.entry_count += 1;
                stats.bytes += metadata.len();
            }
        }
        stats
    }
}

fn is_cache_file(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some(CACHE_FILE_EXTENSION)
}
