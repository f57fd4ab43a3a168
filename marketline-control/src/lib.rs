//! Control Plane (C8): configuration loading, start/stop lifecycle, and
//! the `/health`/`/metrics` HTTP surface shared by the ingester and
//! storage roles.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod metrics;

pub use config::{Config, Role};
pub use health::{ComponentStatus, HealthRegistry, HealthReport};
pub use lifecycle::{Component, Runtime};
pub use metrics::MetricsRegistry;
