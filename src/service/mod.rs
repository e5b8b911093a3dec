//! Service layer for the arena-matchmaker service
//!
//! Application state wiring, background tasks and health checks for the
//! production binary.

pub mod app;
pub mod health;

pub use app::{AppState, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus, ServiceStats};
