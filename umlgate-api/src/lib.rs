//! umlgate API - HTTP gateway for repository analysis
//!
//! Fronts a separate analysis service: caches its answers in memory and on
//! disk, starts it locally on demand, and proxies diagram generation. Errors
//! leave the process through one typed boundary (`ApiError`).

pub mod config;
pub mod constants;
pub mod error;
pub mod macros;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;
pub mod upstream;

// Re-export commonly used types
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorFormat, ErrorKind};
pub use routes::create_router;
pub use services::{
    shutdown_signal, AnalysisOrchestrator, AnalysisOutcome, AnalysisSource, Availability,
    AvailabilityCoordinator, PythonLauncher, ServiceHandle, ServiceLauncher, SupervisorState,
    SupervisorStatus,
};
pub use state::AppState;
pub use upstream::HttpUpstream;
