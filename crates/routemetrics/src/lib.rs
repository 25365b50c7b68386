//! Top-level facade crate for routemetrics.
//!
//! Re-exports the attribution core and the axum integration so users can
//! depend on a single crate.

pub mod core {
    pub use routemetrics_core::*;
}

pub mod server {
    pub use routemetrics_server::*;
}

pub use routemetrics_server::{MetricsRouter, RequestTimer, RouteMetrics, StatsId};
