//! routemetrics server library entry.
//!
//! Binds the attribution pipeline from `routemetrics-core` to axum and to a
//! `prometheus` registry. Consumed by the demo binary (`main.rs`) and by
//! integration tests.

pub mod app_state;
pub mod config;
pub mod obs;
pub mod ops;
pub mod plugin;
pub mod router;

pub use obs::MetricsClient;
pub use plugin::{MetricsRouter, RequestTimer, RouteMetrics, StatsId};
