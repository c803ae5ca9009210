//! Middleware modules for umlgate API
//!
//! - `rate_limit`: per-client request budget on the analysis endpoints
//! - `admin`: shared-secret gate for the admin routes
//! - `error_format`: per-route error body shape
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .route("/generate-plantuml", post(handler))
//!     // Runs first on request, last on response, so it also reshapes 429s
//!     .route_layer(middleware::from_fn_with_state(ErrorFormat::Simple, error_format_middleware))
//!     .route_layer(middleware::from_fn_with_state(rate_limit_state, rate_limit_middleware))
//! ```
//!
//! With `route_layer`, the layer added last wraps the ones before it.

mod admin;
mod error_format;
mod rate_limit;

pub use admin::{admin_middleware, AdminGuard};
pub use error_format::error_format_middleware;
pub use rate_limit::{rate_limit_middleware, RateLimitKey, RateLimitState};
