//! Statistics engine adapters.
//!
//! Route latency is recorded into a histogram and a summary registered on a
//! `prometheus::Registry`; the `/metrics` handler renders that registry.

pub mod metrics;

pub use metrics::{MetricsClient, RouteHistogram, RouteSummary};
