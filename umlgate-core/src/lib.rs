//! umlgate core
//!
//! Domain types and the cache tiers behind the umlgate backend:
//! request/response validation, archive checks, the two-tier result cache,
//! and the contract for the external analysis service. Nothing here speaks
//! HTTP; the API crate owns that.

pub mod analysis;
pub mod archive;
pub mod cache;
pub mod diagram;
pub mod error;
pub mod upstream;

pub use analysis::{
    validate_analysis_payload, AnalysisMeta, AnalysisRequest, CachedAnalysis, RepositoryRef,
};
pub use archive::{ensure_contained, ArchiveUpload, TempUpload};
pub use cache::{
    derive_key, CacheKey, CacheStats, CacheTier, DiskCache, MemoryCache, PurgeReport,
    TieredCache, TieredCacheInfo,
};
pub use diagram::{DiagramType, PlantUmlRequest};
pub use error::{
    CacheError, CoreError, CoreResult, ServiceError, UpstreamError, ValidationError,
};
pub use upstream::{AnalysisUpstream, UpstreamResponse};
