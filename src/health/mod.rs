// src/health/mod.rs
mod checker;
mod registry;

pub use checker::{HealthChecker, HealthCheckResult};
pub use registry::HealthRegistry;
