//! Error types for umlgate core operations

use thiserror::Error;

/// Input and response-shape validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Ambiguous request: {reason}")]
    AmbiguousRequest { reason: String },

    #[error("Invalid analysis response at '{path}': {reason}")]
    InvalidShape { path: String, reason: String },

    #[error("Rejected archive upload: {reason}")]
    RejectedArchive { reason: String },

    #[error("Path escapes upload directory: {path}")]
    PathTraversal { path: String },
}

/// Errors raised while talking to the analysis service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("Upstream call '{operation}' timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("Upstream {endpoint} unreachable: {reason}")]
    Unavailable { endpoint: String, reason: String },

    #[error("Upstream rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Upstream failed with status {status}: {message}")]
    Failed { status: u16, message: String },

    #[error("Upstream returned an unreadable body: {reason}")]
    InvalidBody { reason: String },
}

/// Cache tier errors. The disk tier never propagates these to requests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache I/O failed for {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Cache serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Analysis-service supervision errors.
///
/// `Clone` is required: a single start attempt is shared by every caller
/// waiting on it, and a failed attempt is remembered and replayed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Service probe of {endpoint} failed: {reason}")]
    ProbeFailed { endpoint: String, reason: String },

    #[error("No usable interpreter found (tried: {})", tried.join(", "))]
    NoInterpreter { tried: Vec<String> },

    #[error("Service script not found (tried: {})", tried.join(", "))]
    ScriptNotFound { tried: Vec<String> },

    #[error("Failed to spawn service: {reason}")]
    SpawnFailed { reason: String },

    #[error("Service exited during startup with code {code:?}")]
    ExitedEarly { code: Option<i32> },

    #[error("Service at {endpoint} not ready after {waited_ms}ms")]
    NotReady { endpoint: String, waited_ms: u64 },
}

/// Master error type for core operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Not found: {what}")]
    NotFound { what: String },
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

impl CacheError {
    pub(crate) fn io(path: &std::path::Path, err: &std::io::Error) -> Self {
        CacheError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization {
            reason: err.to_string(),
        }
    }
}
