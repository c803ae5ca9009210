//! Two-tier result cache with commit-aware keys.
//!
//! - [`key`]: alias (`owner/repo`) and snapshot (`owner/repo@commit`) keys
//! - [`memory`]: bounded FIFO tier with TTL checked on read
//! - [`disk`]: content-addressed file tier with mtime TTL checked on read
//! - [`tiered`]: the memory-over-disk facade handlers talk to
//!
//! Expiry is lazy in both tiers. There is no sweeper task.

pub mod disk;
pub mod key;
pub mod memory;
pub mod tiered;
pub mod traits;

pub use disk::DiskCache;
pub use key::{derive_key, CacheKey};
pub use memory::{CacheEntry, MemoryCache};
pub use tiered::{PurgeReport, TieredCache, TieredCacheInfo};
pub use traits::{CacheStats, CacheTier};
