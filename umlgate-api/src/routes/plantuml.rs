//! Diagram generation proxy.
//!
//! Errors from this endpoint use the simple `{error}` body; the router
//! attaches an `ErrorFormat::Simple` layer to it.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use umlgate_core::PlantUmlRequest;

use crate::error::ApiResult;
use crate::services::AnalysisOrchestrator;

/// POST /generate-plantuml
pub async fn generate_plantuml(
    State(orchestrator): State<Arc<AnalysisOrchestrator>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(body) = body?;
    let request = PlantUmlRequest::from_value(&body)?;
    tracing::debug!(diagram_type = %request.diagram_type, "Generating diagram");

    let response = orchestrator.generate_plantuml(&request).await?;
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    Ok((status, Json(response.body)).into_response())
}
