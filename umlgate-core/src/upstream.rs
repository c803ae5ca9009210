//! Contract for the external analysis service.
//!
//! The HTTP implementation lives in the API crate; tests substitute their own.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use crate::analysis::RepositoryRef;
use crate::diagram::PlantUmlRequest;
use crate::error::UpstreamError;

/// A successful (2xx) answer from the analysis service.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

impl UpstreamResponse {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }
}

/// Operations the analysis service offers.
///
/// Implementations return `Err(UpstreamError::Rejected)` for 4xx answers and
/// `Err(UpstreamError::Failed)` for 5xx answers; they do not retry.
#[async_trait]
pub trait AnalysisUpstream: Send + Sync {
    /// Analyse a hosted repository.
    async fn analyze_reference(
        &self,
        reference: &RepositoryRef,
    ) -> Result<UpstreamResponse, UpstreamError>;

    /// Analyse an archive already written to `path`.
    async fn analyze_archive(
        &self,
        path: &Path,
        file_name: &str,
    ) -> Result<UpstreamResponse, UpstreamError>;

    /// Render diagram text from a schema.
    async fn generate_plantuml(
        &self,
        request: &PlantUmlRequest,
    ) -> Result<UpstreamResponse, UpstreamError>;

    /// Base URL, for logs and error messages.
    fn endpoint(&self) -> &str;
}
