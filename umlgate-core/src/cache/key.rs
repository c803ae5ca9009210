//! Cache key derivation.
//!
//! Every analysed resource is addressable two ways:
//!
//! - the **alias** key (`owner/repo`) always points at the most recently
//!   observed result for the resource;
//! - the **snapshot** key (`owner/repo@<commit>`) pins one commit and is never
//!   rewritten, only expired by TTL or capacity.

use std::fmt;

/// Separator between the resource id and the commit in snapshot keys.
pub const SNAPSHOT_SEPARATOR: char = '@';

/// A cache key in either alias or snapshot form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Alias key for a resource.
    pub fn alias(resource: &str) -> Self {
        Self(resource.to_string())
    }

    /// Snapshot key for a resource pinned at `commit`.
    pub fn snapshot(resource: &str, commit: &str) -> Self {
        Self(format!("{}{}{}", resource, SNAPSHOT_SEPARATOR, commit))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key is commit-qualified.
    pub fn is_snapshot(&self) -> bool {
        self.0.contains(SNAPSHOT_SEPARATOR)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the cache key for `resource`, optionally pinned to `commit`.
///
/// A blank commit is treated as absent and yields the alias key.
pub fn derive_key(resource: &str, commit: Option<&str>) -> CacheKey {
    match commit.map(str::trim).filter(|c| !c.is_empty()) {
        Some(commit) => CacheKey::snapshot(resource, commit),
        None => CacheKey::alias(resource),
    }
}
