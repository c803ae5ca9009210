//! Analysis Orchestrator
//!
//! Runs one analysis request end to end: cache lookup, availability check,
//! the bounded upstream call, result validation, commit-aware invalidation
//! and write-through to both cache tiers.
//!
//! Archive uploads are never cached; their temporary file is removed on every
//! exit path by `TempUpload`'s drop.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};
use umlgate_core::{
    validate_analysis_payload, AnalysisRequest, AnalysisUpstream, ArchiveUpload, CacheTier,
    CachedAnalysis, CoreError, PlantUmlRequest, RepositoryRef, TempUpload, TieredCache,
    UpstreamError, UpstreamResponse,
};

use crate::error::{ApiError, ApiResult};
use crate::services::availability::AvailabilityCoordinator;

/// Where an analysis answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisSource {
    Cache(CacheTier),
    Upstream,
}

impl AnalysisSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisSource::Cache(CacheTier::Memory) => "memory",
            AnalysisSource::Cache(CacheTier::Disk) => "disk",
            AnalysisSource::Upstream => "upstream",
        }
    }
}

/// A validated analysis ready to return to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub status: u16,
    pub body: Value,
    pub commit: Option<String>,
    pub source: AnalysisSource,
}

impl AnalysisOutcome {
    fn from_cached(cached: CachedAnalysis, source: AnalysisSource) -> Self {
        Self {
            status: cached.status,
            body: cached.body,
            commit: cached.commit,
            source,
        }
    }
}

pub struct AnalysisOrchestrator {
    cache: Arc<TieredCache>,
    upstream: Arc<dyn AnalysisUpstream>,
    availability: Arc<AvailabilityCoordinator>,
    upload_dir: PathBuf,
    upstream_timeout: Duration,
}

impl AnalysisOrchestrator {
    pub fn new(
        cache: Arc<TieredCache>,
        upstream: Arc<dyn AnalysisUpstream>,
        availability: Arc<AvailabilityCoordinator>,
        upload_dir: impl Into<PathBuf>,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            upstream,
            availability,
            upload_dir: upload_dir.into(),
            upstream_timeout,
        }
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> ApiResult<AnalysisOutcome> {
        match request {
            AnalysisRequest::Reference { reference, refresh } => {
                self.analyze_reference(&reference, refresh).await
            }
            AnalysisRequest::Archive(upload) => self.analyze_archive(upload).await,
        }
    }

    /// Analyse a hosted repository, serving from cache when possible.
    pub async fn analyze_reference(
        &self,
        reference: &RepositoryRef,
        refresh: bool,
    ) -> ApiResult<AnalysisOutcome> {
        let alias = reference.alias_key();

        if !refresh {
            if let Some((cached, tier)) = self.cache.lookup(&alias).await {
                debug!(key = %alias, tier = ?tier, "Serving analysis from cache");
                return Ok(AnalysisOutcome::from_cached(cached, AnalysisSource::Cache(tier)));
            }
        }

        self.availability.ensure_available().await?;
        let response = self
            .bounded("analyze", self.upstream.analyze_reference(reference))
            .await?;

        let meta = validate_analysis_payload(&response.body)?;
        let cached = CachedAnalysis::new(response.status, response.body, &meta);

        // Re-read after the await: another request may have written the alias meanwhile.
        if let Some(commit) = &meta.commit {
            match self.cache.current_commit(&alias).await {
                Some(previous) if &previous != commit => {
                    info!(key = %alias, previous = %previous, current = %commit, "Commit changed, invalidating alias");
                    self.cache.invalidate(&alias).await;
                }
                _ => {}
            }
        }

        self.cache.store(&alias, &cached).await;
        // A snapshot is written once; re-fetching the same commit never replaces it.
        if let Some(commit) = &meta.commit {
            let snapshot = reference.snapshot_key(commit);
            if !self.cache.store_if_absent(&snapshot, &cached).await {
                debug!(key = %snapshot, "Snapshot already cached, keeping it");
            }
        }
        info!(
            key = %alias,
            commit = meta.commit.as_deref().unwrap_or("unknown"),
            files_scanned = meta.files_scanned.unwrap_or_default(),
            "Stored analysis"
        );

        Ok(AnalysisOutcome::from_cached(cached, AnalysisSource::Upstream))
    }

    /// Analyse an uploaded archive. Results are not cached.
    pub async fn analyze_archive(&self, upload: ArchiveUpload) -> ApiResult<AnalysisOutcome> {
        upload.validate()?;
        let temp = TempUpload::persist(&self.upload_dir, &upload).await?;

        self.availability.ensure_available().await?;
        let response = self
            .bounded(
                "analyze",
                self.upstream.analyze_archive(temp.path(), temp.file_name()),
            )
            .await?;
        drop(temp);

        let meta = validate_analysis_payload(&response.body)?;
        Ok(AnalysisOutcome {
            status: response.status,
            body: response.body,
            commit: meta.commit,
            source: AnalysisSource::Upstream,
        })
    }

    /// Pinned snapshot from the cache tiers. Never calls upstream.
    pub async fn snapshot(&self, reference: &RepositoryRef, commit: &str) -> ApiResult<AnalysisOutcome> {
        let key = reference.snapshot_key(commit);
        match self.cache.lookup(&key).await {
            Some((cached, tier)) => Ok(AnalysisOutcome::from_cached(cached, AnalysisSource::Cache(tier))),
            None => Err(CoreError::NotFound {
                what: format!("snapshot {}", key),
            }
            .into()),
        }
    }

    /// Proxy a diagram generation request.
    pub async fn generate_plantuml(&self, request: &PlantUmlRequest) -> ApiResult<UpstreamResponse> {
        self.availability.ensure_available().await?;
        self.bounded("generate-plantuml", self.upstream.generate_plantuml(request))
            .await
    }

    /// Await an upstream call under the configured timeout. A timed-out call
    /// is dropped and nothing downstream of it runs.
    async fn bounded<F>(&self, operation: &str, call: F) -> ApiResult<UpstreamResponse>
    where
        F: Future<Output = Result<UpstreamResponse, UpstreamError>>,
    {
        match tokio::time::timeout(self.upstream_timeout, call).await {
            Ok(result) => result.map_err(ApiError::from),
            Err(_) => {
                warn!(operation, timeout_ms = self.upstream_timeout.as_millis() as u64, "Upstream call timed out");
                Err(UpstreamError::Timeout {
                    operation: operation.to_string(),
                    after_ms: self.upstream_timeout.as_millis() as u64,
                }
                .into())
            }
        }
    }
}
