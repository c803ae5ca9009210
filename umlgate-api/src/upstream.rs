//! HTTP client for the analysis service.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use umlgate_core::{
    AnalysisUpstream, PlantUmlRequest, RepositoryRef, UpstreamError, UpstreamResponse,
};

use crate::error::{ApiError, ApiResult};

/// `AnalysisUpstream` over HTTP.
///
/// The client carries no request timeout of its own; the orchestrator bounds
/// each call.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUpstream {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                ApiError::internal_error(format!("Failed to build upstream client: {}", e))
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, operation: &str, err: reqwest::Error) -> UpstreamError {
        if err.is_timeout() {
            UpstreamError::Timeout {
                operation: operation.to_string(),
                after_ms: 0,
            }
        } else {
            UpstreamError::Unavailable {
                endpoint: self.base_url.clone(),
                reason: err.to_string(),
            }
        }
    }

    /// Read the body as JSON and sort the status into ok, rejected or failed.
    async fn finish(
        &self,
        operation: &str,
        response: reqwest::Response,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(operation, e))?;

        if (200..300).contains(&status) {
            let body: Value = serde_json::from_str(&text).map_err(|e| UpstreamError::InvalidBody {
                reason: e.to_string(),
            })?;
            return Ok(UpstreamResponse { status, body });
        }

        let message = upstream_message(&text).unwrap_or_else(|| format!("HTTP {}", status));
        tracing::warn!(operation, status, message = %message, "Analysis service returned an error");
        if (400..500).contains(&status) {
            Err(UpstreamError::Rejected { status, message })
        } else {
            Err(UpstreamError::Failed { status, message })
        }
    }
}

/// Pull a human-readable message out of an error body.
fn upstream_message(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => ["error", "message", "detail"]
            .iter()
            .find_map(|field| match map.get(*field) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Object(inner)) => inner
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            }),
        _ => Some(trimmed.chars().take(200).collect()),
    }
}

#[async_trait]
impl AnalysisUpstream for HttpUpstream {
    async fn analyze_reference(
        &self,
        reference: &RepositoryRef,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let response = self
            .client
            .post(self.url("/analyze"))
            .json(&json!({ "githubUrl": reference.clone_url() }))
            .send()
            .await
            .map_err(|e| self.transport_error("analyze", e))?;
        self.finish("analyze", response).await
    }

    async fn analyze_archive(
        &self,
        path: &Path,
        file_name: &str,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| UpstreamError::Unavailable {
                endpoint: self.base_url.clone(),
                reason: format!("could not read upload {}: {}", path.display(), e),
            })?;
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/zip")
            .map_err(|e| self.transport_error("analyze", e))?;
        let form = Form::new().part("repoZip", part);

        let response = self
            .client
            .post(self.url("/analyze"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error("analyze", e))?;
        self.finish("analyze", response).await
    }

    async fn generate_plantuml(
        &self,
        request: &PlantUmlRequest,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let response = self
            .client
            .post(self.url("/generate-plantuml"))
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error("generate-plantuml", e))?;
        self.finish("generate-plantuml", response).await
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_message_extraction() {
        assert_eq!(
            upstream_message(r#"{"error": "Invalid GitHub URL"}"#).as_deref(),
            Some("Invalid GitHub URL")
        );
        assert_eq!(
            upstream_message(r#"{"error": {"message": "nested"}}"#).as_deref(),
            Some("nested")
        );
        assert_eq!(upstream_message("Bad Gateway").as_deref(), Some("Bad Gateway"));
        assert_eq!(upstream_message("   "), None);
        assert_eq!(upstream_message(r#"{"ok": false}"#), None);
    }

    #[test]
    fn test_base_url_normalized() {
        let upstream = HttpUpstream::new("http://localhost:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(upstream.endpoint(), "http://localhost:5000");
        assert_eq!(upstream.url("/analyze"), "http://localhost:5000/analyze");
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        // Port 9 (discard) on loopback is closed on test machines.
        let upstream = HttpUpstream::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let reference = umlgate_core::RepositoryRef::parse("acme/widgets").unwrap();
        let err = upstream.analyze_reference(&reference).await.unwrap_err();
        assert!(matches!(
            err,
            UpstreamError::Unavailable { .. } | UpstreamError::Timeout { .. }
        ));
    }
}
