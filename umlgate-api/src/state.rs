//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use umlgate_core::{AnalysisUpstream, DiskCache, MemoryCache, TieredCache};

use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult};
use crate::services::{AnalysisOrchestrator, AvailabilityCoordinator};
use crate::upstream::HttpUpstream;

/// Application-wide state shared across all routes.
///
/// Every component is built once here and injected; nothing is global.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ApiConfig>,
    pub cache: Arc<TieredCache>,
    pub upstream: Arc<dyn AnalysisUpstream>,
    pub availability: Arc<AvailabilityCoordinator>,
    pub orchestrator: Arc<AnalysisOrchestrator>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the given upstream and coordinator into fresh cache tiers.
    pub fn new(
        config: ApiConfig,
        upstream: Arc<dyn AnalysisUpstream>,
        availability: Arc<AvailabilityCoordinator>,
    ) -> Self {
        let cache = Arc::new(TieredCache::new(
            MemoryCache::new(config.memory_ttl, config.memory_max_entries),
            DiskCache::new(config.cache_dir.clone(), config.disk_ttl),
        ));
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            cache.clone(),
            upstream.clone(),
            availability.clone(),
            config.upload_dir.clone(),
            config.upstream_timeout,
        ));

        Self {
            config: Arc::new(config),
            cache,
            upstream,
            availability,
            orchestrator,
            start_time: Instant::now(),
        }
    }

    /// Production wiring: HTTP upstream and a Python-launching coordinator.
    pub async fn from_config(config: ApiConfig) -> ApiResult<Self> {
        let upstream = HttpUpstream::new(&config.upstream_url, config.probe_timeout)?;
        let availability = AvailabilityCoordinator::from_config(&config).map_err(|e| {
            ApiError::internal_error(format!("Invalid analysis service endpoint: {}", e))
        })?;

        let state = Self::new(config, Arc::new(upstream), Arc::new(availability));
        state.cache.disk().ensure_dir().await?;
        tokio::fs::create_dir_all(&state.config.upload_dir)
            .await
            .map_err(|e| {
                ApiError::internal_error(format!(
                    "Failed to create upload dir {}: {}",
                    state.config.upload_dir.display(),
                    e
                ))
            })?;
        Ok(state)
    }
}

crate::impl_from_ref!(Arc<ApiConfig>, config);
crate::impl_from_ref!(Arc<TieredCache>, cache);
crate::impl_from_ref!(Arc<dyn AnalysisUpstream>, upstream);
crate::impl_from_ref!(Arc<AvailabilityCoordinator>, availability);
crate::impl_from_ref!(Arc<AnalysisOrchestrator>, orchestrator);
