//! Service Layer
//!
//! Request orchestration and supervision of the analysis service, kept
//! apart from the HTTP handlers that call them.

pub mod availability;
mod orchestrator;

pub use availability::{
    shutdown_signal, Availability, AvailabilityCoordinator, PythonLauncher, ServiceHandle,
    ServiceLauncher, SupervisorState, SupervisorStatus,
};
pub use orchestrator::*;
