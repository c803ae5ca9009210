//! Per-route error body shape.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::{ApiError, ErrorFormat};

/// Re-render error responses produced under this layer in `format`.
///
/// Only responses that carry an `ApiError` extension are touched; status and
/// headers (such as `retry-after`) are kept.
pub async fn error_format_middleware(
    State(format): State<ErrorFormat>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    if format == ErrorFormat::Envelope {
        return response;
    }
    let Some(error) = response.extensions().get::<ApiError>().cloned() else {
        return response;
    };

    let (parts, _) = response.into_parts();
    let mut rendered = (parts.status, Json(format.body(&error))).into_response();
    for (name, value) in parts.headers.iter() {
        if name != header::CONTENT_TYPE && name != header::CONTENT_LENGTH {
            rendered.headers_mut().append(name.clone(), value.clone());
        }
    }
    rendered.extensions_mut().insert(error);
    rendered
}
