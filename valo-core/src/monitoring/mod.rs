//! Metrics, health state, and the HTTP export server.

pub mod health;
pub mod metrics;
pub mod server;

pub use health::{HealthMonitor, HealthStatus};
pub use metrics::{
    BroadcastMetrics, IntakeMetrics, SystemMetrics, ValoMetrics, ValuationMetrics,
};
pub use server::{MonitoringServer, MonitoringServerConfig};
