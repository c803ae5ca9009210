//! Error Types for umlgate API
//!
//! This module defines the single error taxonomy of the HTTP layer:
//! - `ErrorKind`: the stable, client-facing categories, one status each
//! - `ApiError`: built at the failure site, carrying kind, message, details
//! - `ErrorFormat`: how an error body is shaped for a given endpoint
//!
//! Nothing else in the crate writes an error response. Handlers return
//! `ApiError`, library failures are converted with `From`, and the response
//! is rendered here.

use std::fmt;

use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use umlgate_core::{
    CacheError, CoreError, ServiceError, UpstreamError, ValidationError,
};

// ============================================================================
// ERROR KIND ENUM
// ============================================================================

/// Client-facing error categories.
///
/// Each kind maps to exactly one HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Malformed or unacceptable input, or an unusable upstream answer
    Validation,

    /// Credentials missing
    Authentication,

    /// Credentials present but wrong
    Authorization,

    /// No such route or resource
    NotFound,

    /// Client exceeded its request budget
    RateLimit,

    /// The analysis service is unreachable or failed
    ExternalServiceUnavailable,

    /// A bounded operation ran out of time
    Timeout,

    /// Request body over the configured limit
    PayloadTooLarge,

    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Get the HTTP status code for this kind.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::ExternalServiceUnavailable => StatusCode::BAD_GATEWAY,
        }
    }

    /// Get a default message for this kind.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Request validation failed",
            ErrorKind::Authentication => "Authentication required",
            ErrorKind::Authorization => "Access forbidden",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::RateLimit => "Rate limit exceeded",
            ErrorKind::ExternalServiceUnavailable => "Analysis service unavailable",
            ErrorKind::Timeout => "Operation timed out",
            ErrorKind::PayloadTooLarge => "Request body too large",
            ErrorKind::Internal => "Internal server error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error for API operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub kind: ErrorKind,

    /// Human-readable message, sent to the client
    pub message: String,

    /// Optional structured details, sent to the client
    pub details: Option<Value>,

    /// Underlying failure, logged but never sent
    pub cause: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    /// Create an error with the kind's default message.
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.kind.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn too_many_requests(retry_after_secs: u64) -> Self {
        Self::new(
            ErrorKind::RateLimit,
            format!("Rate limit exceeded. Retry after {} seconds", retry_after_secs),
        )
        .with_details(json!({ "retry_after_secs": retry_after_secs }))
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalServiceUnavailable, message)
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PayloadTooLarge, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// RESPONSE FORMATS
// ============================================================================

/// Body shape used when an endpoint reports an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorFormat {
    /// `{success: false, error: {message, type, timestamp, details?}}`
    #[default]
    Envelope,
    /// `{error: message}`, kept for the diagram generation endpoint
    Simple,
}

impl ErrorFormat {
    pub fn body(&self, error: &ApiError) -> Value {
        match self {
            ErrorFormat::Envelope => {
                let mut inner = json!({
                    "message": error.message,
                    "type": error.kind,
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                });
                if let (Some(details), Some(map)) = (&error.details, inner.as_object_mut()) {
                    map.insert("details".to_string(), details.clone());
                }
                json!({ "success": false, "error": inner })
            }
            ErrorFormat::Simple => json!({ "error": error.message }),
        }
    }

    pub fn render(&self, error: &ApiError) -> Response {
        (error.status_code(), Json(self.body(error))).into_response()
    }
}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

/// Renders the envelope and attaches the error to the response extensions,
/// where a route's `ErrorFormat` layer may re-render it.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(
                kind = %self.kind,
                message = %self.message,
                cause = self.cause.as_deref().unwrap_or(""),
                "Request failed"
            );
        } else {
            tracing::debug!(
                kind = %self.kind,
                message = %self.message,
                cause = self.cause.as_deref().unwrap_or(""),
                "Request rejected"
            );
        }

        let mut response = ErrorFormat::Envelope.render(&self);
        response.extensions_mut().insert(self);
        response
    }
}

// ============================================================================
// CONVERSIONS FROM CORE ERRORS
// ============================================================================

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let details = match &err {
            ValidationError::RequiredFieldMissing { field }
            | ValidationError::InvalidValue { field, .. } => Some(json!({ "field": field })),
            ValidationError::InvalidShape { path, .. } => Some(json!({ "path": path })),
            _ => None,
        };
        let error = ApiError::validation(err.to_string());
        match details {
            Some(details) => error.with_details(details),
            None => error,
        }
    }
}

impl From<UpstreamError> for ApiError {
    fn from(err: UpstreamError) -> Self {
        match &err {
            UpstreamError::Timeout { operation, after_ms } => ApiError::timeout(operation)
                .with_details(json!({ "timeout_ms": after_ms }))
                .with_cause(&err),
            UpstreamError::Unavailable { .. } => {
                ApiError::service_unavailable("Analysis service is unreachable").with_cause(&err)
            }
            UpstreamError::Rejected { status: 413, message } => {
                ApiError::payload_too_large(message.clone()).with_cause(&err)
            }
            UpstreamError::Rejected { status, message } => ApiError::validation(message.clone())
                .with_details(json!({ "upstream_status": status })),
            UpstreamError::Failed { status, .. } => {
                ApiError::service_unavailable("Analysis service failed")
                    .with_details(json!({ "upstream_status": status }))
                    .with_cause(&err)
            }
            UpstreamError::InvalidBody { reason } => {
                ApiError::validation(format!("Analysis service returned an invalid body: {}", reason))
            }
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError::service_unavailable("Analysis service is not available").with_cause(&err)
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::internal_error("Cache operation failed").with_cause(&err)
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(e) => e.into(),
            CoreError::Upstream(e) => e.into(),
            CoreError::Cache(e) => e.into(),
            CoreError::Service(e) => e.into(),
            CoreError::NotFound { what } => ApiError::not_found(format!("{} not found", what)),
        }
    }
}

// ============================================================================
// CONVERSIONS FROM LIBRARY ERRORS
// ============================================================================

/// Convert JSON body rejections. An over-limit body is 413, everything else 400.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::from_kind(ErrorKind::PayloadTooLarge);
        }
        ApiError::validation(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::validation(format!("Invalid multipart body: {}", rejection.body_text()))
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::from_kind(ErrorKind::PayloadTooLarge).with_cause(err.body_text());
        }
        ApiError::validation(format!("Invalid multipart body: {}", err.body_text()))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::validation(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
