//! Shared error type across routemetrics crates.

use thiserror::Error;

/// Stable error classification (used in logs and by tests).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid setup-time configuration.
    Config,
    /// The statistics engine rejected a registration or observation.
    Engine,
    /// Scrape output could not be encoded.
    Scrape,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// String representation used in logs and HTTP bodies.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Config => "CONFIG",
            ErrorKind::Engine => "ENGINE",
            ErrorKind::Scrape => "SCRAPE",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, RouteMetricsError>;

/// Unified error type used by core and server.
#[derive(Debug, Error)]
pub enum RouteMetricsError {
    #[error("invalid config: {0}")]
    Config(String),
    #[error("metrics engine: {0}")]
    Engine(String),
    #[error("scrape failed: {0}")]
    Scrape(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl RouteMetricsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RouteMetricsError::Config(_) => ErrorKind::Config,
            RouteMetricsError::Engine(_) => ErrorKind::Engine,
            RouteMetricsError::Scrape(_) => ErrorKind::Scrape,
            RouteMetricsError::Internal(_) => ErrorKind::Internal,
        }
    }
}
