//! Analysis Endpoints
//!
//! - `POST /analyze`: JSON `{repositoryReference | githubUrl, refresh?}` or a
//!   multipart form with a `repoZip` (alias `archive`) file
//! - `GET /analyze/:owner/:repo/:commit`: a previously cached snapshot

use std::sync::Arc;

use axum::{
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::Value;
use umlgate_core::{AnalysisRequest, ArchiveUpload, RepositoryRef};

use crate::error::{ApiError, ApiResult};
use crate::services::{AnalysisOrchestrator, AnalysisOutcome};
use crate::state::AppState;

/// Field names accepted for the repository reference.
const REFERENCE_FIELDS: &[&str] = &["repositoryReference", "githubUrl"];

/// Field names accepted for the archive file.
const ARCHIVE_FIELDS: &[&str] = &["repoZip", "archive"];

/// Response header naming the tier that answered.
pub const ANALYSIS_SOURCE_HEADER: &str = "x-analysis-source";

fn outcome_response(outcome: AnalysisOutcome) -> Response {
    let status = StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::OK);
    let mut response = (status, Json(outcome.body)).into_response();
    response.headers_mut().insert(
        HeaderName::from_static(ANALYSIS_SOURCE_HEADER),
        HeaderValue::from_static(outcome.source.as_str()),
    );
    response
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
}

/// Request from a JSON body.
fn request_from_json(body: &Value) -> ApiResult<AnalysisRequest> {
    let object = body
        .as_object()
        .ok_or_else(|| ApiError::validation("Request body must be a JSON object"))?;

    let mut reference = None;
    for field in REFERENCE_FIELDS {
        match object.get(*field) {
            None | Some(Value::Null) => {}
            Some(Value::String(s)) => {
                reference = Some(s.as_str());
                break;
            }
            Some(_) => {
                return Err(ApiError::validation(format!("'{}' must be a string", field)));
            }
        }
    }

    let refresh = match object.get("refresh") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(ApiError::validation("'refresh' must be a boolean")),
    };

    Ok(AnalysisRequest::from_parts(reference, None, refresh)?)
}

/// Request from a multipart form.
async fn request_from_multipart(mut multipart: Multipart) -> ApiResult<AnalysisRequest> {
    let mut reference: Option<String> = None;
    let mut archive: Option<ArchiveUpload> = None;
    let mut refresh = false;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if ARCHIVE_FIELDS.contains(&name.as_str()) {
            if archive.is_some() {
                return Err(ApiError::validation("Only one archive may be uploaded per request"));
            }
            let file_name = field.file_name().unwrap_or_default().to_string();
            let content_type = field.content_type().map(str::to_string);
            let data: Bytes = field.bytes().await?;
            archive = Some(ArchiveUpload::new(file_name, content_type, data));
        } else if REFERENCE_FIELDS.contains(&name.as_str()) {
            let text = field.text().await?;
            if !text.trim().is_empty() {
                reference = Some(text);
            }
        } else if name == "refresh" {
            refresh = parse_flag(&field.text().await?);
        }
    }

    Ok(AnalysisRequest::from_parts(reference.as_deref(), archive, refresh)?)
}

/// POST /analyze
pub async fn analyze(
    State(state): State<AppState>,
    request: Request,
) -> ApiResult<Response> {
    let analysis = if is_multipart(&request) {
        let multipart = Multipart::from_request(request, &state).await?;
        request_from_multipart(multipart).await?
    } else {
        let Json(body) = Json::<Value>::from_request(request, &state).await?;
        request_from_json(&body)?
    };

    let outcome = state.orchestrator.analyze(analysis).await?;
    Ok(outcome_response(outcome))
}

/// GET /analyze/:owner/:repo/:commit
pub async fn snapshot(
    State(orchestrator): State<Arc<AnalysisOrchestrator>>,
    Path((owner, repo, commit)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let reference = RepositoryRef::parse(&format!("{}/{}", owner, repo))?;
    let commit = commit.trim();
    if commit.is_empty() {
        return Err(ApiError::validation("commit must not be empty"));
    }
    let outcome = orchestrator.snapshot(&reference, commit).await?;
    Ok(outcome_response(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_from_json_accepts_both_names() {
        let request = request_from_json(&json!({"repositoryReference": "acme/widgets"})).unwrap();
        assert!(matches!(request, AnalysisRequest::Reference { refresh: false, .. }));

        let request = request_from_json(&json!({
            "githubUrl": "https://github.com/acme/widgets",
            "refresh": true
        }))
        .unwrap();
        assert!(matches!(request, AnalysisRequest::Reference { refresh: true, .. }));
    }

    #[test]
    fn test_request_from_json_rejects_bad_input() {
        assert!(request_from_json(&json!({})).is_err());
        assert!(request_from_json(&json!([])).is_err());
        assert!(request_from_json(&json!({"repositoryReference": 42})).is_err());
        assert!(request_from_json(&json!({"repositoryReference": "acme/widgets", "refresh": "y"})).is_err());
        assert!(request_from_json(&json!({"repositoryReference": "ftp://github.com/a/b"})).is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }
}
