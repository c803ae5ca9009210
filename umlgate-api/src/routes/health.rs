//! Health Check Endpoint
//!
//! `GET /health` reports liveness plus whether the analysis service accepts
//! connections. It never starts the service. No authentication required.

use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::services::SupervisorStatus;
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamHealth {
    pub endpoint: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub supervisor: SupervisorStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub memory_entries: u64,
    pub memory_max_entries: usize,
    pub memory_hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub upstream: UpstreamHealth,
    pub cache: CacheHealth,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    let probe = state.availability.probe(state.config.probe_timeout).await;

    let upstream = UpstreamHealth {
        endpoint: state.availability.endpoint().to_string(),
        reachable: probe.is_ok(),
        latency_ms: probe.is_ok().then(|| started.elapsed().as_millis() as u64),
        error: probe.err().map(|e| e.to_string()),
        supervisor: state.availability.status(),
    };

    let memory = state.cache.memory().stats();
    let cache = CacheHealth {
        memory_entries: memory.entry_count,
        memory_max_entries: state.cache.memory().max_entries(),
        memory_hit_rate: memory.hit_rate(),
    };

    let status = if upstream.reachable {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };
    let status_code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        upstream,
        cache,
    };
    (status_code, Json(response))
}
