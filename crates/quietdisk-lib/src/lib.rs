//! Core library for the quietdisk standby daemon
//!
//! This crate provides the core functionality for:
//! - Querying and changing ATA drive power modes
//! - Sampling per-device I/O counters from the kernel
//! - Idle detection with grace-period hysteresis
//! - Health checks and observability

pub mod health;
pub mod models;
pub mod monitor;
pub mod observability;
pub mod power;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{DaemonMetrics, StructuredLogger};
