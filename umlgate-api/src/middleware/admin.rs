//! Shared-secret gate for admin routes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::constants::ADMIN_TOKEN_HEADER;
use crate::error::ApiError;

/// Holds the digest of the configured admin token, never the token itself.
#[derive(Clone)]
pub struct AdminGuard {
    digest: Arc<[u8; 32]>,
}

fn digest(value: &[u8]) -> [u8; 32] {
    Sha256::digest(value).into()
}

impl AdminGuard {
    pub fn new(token: &SecretString) -> Self {
        Self {
            digest: Arc::new(digest(token.expose_secret().as_bytes())),
        }
    }

    /// Compare digests without short-circuiting.
    pub fn matches(&self, presented: &str) -> bool {
        let presented = digest(presented.as_bytes());
        self.digest
            .iter()
            .zip(presented.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// 401 without the header, 403 with a wrong token.
pub async fn admin_middleware(
    State(guard): State<AdminGuard>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    match presented.as_deref() {
        None => ApiError::unauthorized(format!("Missing {} header", ADMIN_TOKEN_HEADER))
            .into_response(),
        Some(token) if !guard.matches(token) => {
            tracing::warn!(path = %request.uri().path(), "Rejected admin token");
            ApiError::forbidden("Invalid admin token").into_response()
        }
        Some(_) => next.run(request).await,
    }
}
