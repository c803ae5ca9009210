//! umlgate Test Utilities
//!
//! Shared test infrastructure for the umlgate workspace:
//! - `MockUpstream`: scripted analysis service with call counting
//! - fixtures for well-formed and malformed analysis bodies

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

pub use umlgate_core::{
    AnalysisUpstream, PlantUmlRequest, RepositoryRef, UpstreamError, UpstreamResponse,
};

// ============================================================================
// FIXTURES
// ============================================================================

/// A well-formed `{schema, meta}` analysis body.
pub fn analysis_body(commit: Option<&str>, files_scanned: u64, languages: &[&str]) -> Value {
    json!({
        "schema": {
            "python": [{"name": "Widget", "fields": [], "methods": []}],
            "relations": [],
            "endpoints": [],
            "patterns": [],
            "layers": []
        },
        "meta": {
            "commit": commit,
            "files_scanned": files_scanned,
            "classes_found": 1,
            "languages": languages,
            "system": "widgets"
        }
    })
}

/// Analysis body for `commit` with typical defaults.
pub fn analysis_at(commit: &str) -> Value {
    analysis_body(Some(commit), 12, &["python"])
}

/// A body that parses as JSON but fails shape validation.
pub fn malformed_analysis() -> Value {
    json!({"schema": {"relations": "not-an-array"}, "meta": {"files_scanned": -3}})
}

// ============================================================================
// MOCK UPSTREAM
// ============================================================================

type Scripted = Result<UpstreamResponse, UpstreamError>;

/// Scripted analysis service.
///
/// Responses are queued per resource id. When one response is left it is
/// repeated for every later call.
#[derive(Default)]
pub struct MockUpstream {
    references: Mutex<HashMap<String, VecDeque<Scripted>>>,
    archive: Mutex<Option<Scripted>>,
    plantuml: Mutex<Option<Scripted>>,
    delay: Mutex<Option<Duration>>,
    reference_calls: AtomicUsize,
    archive_calls: AtomicUsize,
    plantuml_calls: AtomicUsize,
    archive_paths: Mutex<Vec<(PathBuf, bool)>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `resource` (lowercase `owner/repo`).
    pub fn respond(&self, resource: &str, response: Scripted) -> &Self {
        self.references
            .lock()
            .entry(resource.to_string())
            .or_default()
            .push_back(response);
        self
    }

    /// Queue a 200 with `body` for `resource`.
    pub fn respond_ok(&self, resource: &str, body: Value) -> &Self {
        self.respond(resource, Ok(UpstreamResponse::ok(body)))
    }

    pub fn respond_archive(&self, response: Scripted) -> &Self {
        *self.archive.lock() = Some(response);
        self
    }

    pub fn respond_plantuml(&self, response: Scripted) -> &Self {
        *self.plantuml.lock() = Some(response);
        self
    }

    /// Delay every call by `delay`.
    pub fn with_delay(&self, delay: Duration) -> &Self {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn reference_calls(&self) -> usize {
        self.reference_calls.load(Ordering::SeqCst)
    }

    pub fn archive_calls(&self) -> usize {
        self.archive_calls.load(Ordering::SeqCst)
    }

    pub fn plantuml_calls(&self) -> usize {
        self.plantuml_calls.load(Ordering::SeqCst)
    }

    /// Archive paths received, with whether each existed at call time.
    pub fn archive_paths(&self) -> Vec<(PathBuf, bool)> {
        self.archive_paths.lock().clone()
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn unscripted(what: &str) -> Scripted {
        Err(UpstreamError::Failed {
            status: 500,
            message: format!("no scripted response for {}", what),
        })
    }
}

#[async_trait]
impl AnalysisUpstream for MockUpstream {
    async fn analyze_reference(
        &self,
        reference: &RepositoryRef,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.reference_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let resource = reference.resource_id();
        let mut scripts = self.references.lock();
        let scripted = match scripts.get_mut(&resource) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        scripted.unwrap_or_else(|| Self::unscripted(&resource))
    }

    async fn analyze_archive(
        &self,
        path: &Path,
        _file_name: &str,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.archive_calls.fetch_add(1, Ordering::SeqCst);
        self.archive_paths
            .lock()
            .push((path.to_path_buf(), path.exists()));
        self.pause().await;
        self.archive
            .lock()
            .clone()
            .unwrap_or_else(|| Self::unscripted("archive"))
    }

    async fn generate_plantuml(
        &self,
        _request: &PlantUmlRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        self.plantuml_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        self.plantuml
            .lock()
            .clone()
            .unwrap_or_else(|| Self::unscripted("generate-plantuml"))
    }

    fn endpoint(&self) -> &str {
        "mock://analysis-service"
    }
}
