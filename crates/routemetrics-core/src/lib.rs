//! routemetrics core: request-to-metric attribution, independent of any HTTP
//! framework or statistics engine.
//!
//! The pieces are small and composable:
//! - [`filter::RouteFilter`] decides whether a path is timed at all.
//! - [`labels::LabelResolver`] turns a finished request into a stable,
//!   low-cardinality label set.
//! - [`timing::TimingScope`] carries the two running timers of one request.
//! - [`hooks::RequestHooks`] ties them to a host's request/response hooks.
//!
//! The statistics engine is reached only through [`timing::Observer`].
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Per-request paths
//! never surface errors to the host; only setup returns `Err`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod filter;
pub mod hooks;
pub mod labels;
pub mod options;
pub mod timing;

pub use error::{ErrorKind, Result, RouteMetricsError};
pub use filter::{BlacklistRule, BlacklistSpec, RouteFilter};
pub use hooks::RequestHooks;
pub use labels::{LabelNames, LabelResolver, LabelSet, RequestCompletion};
pub use options::MetricsOptions;
pub use timing::{Observer, StopTimer, TimingScope};
