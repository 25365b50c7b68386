//! Shared application state for the demo server.

use std::sync::Arc;

use prometheus::Registry;
use routemetrics_core::error::Result;

use crate::config::ServerConfig;
use crate::plugin::RouteMetrics;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: ServerConfig,
    metrics: RouteMetrics,
}

impl AppState {
    /// Build application state.
    /// Returns Result so main can report setup errors instead of panicking.
    pub fn new(cfg: ServerConfig, registry: Option<Registry>) -> Result<Self> {
        let metrics = RouteMetrics::new(cfg.metrics.clone(), registry)?;
        Ok(Self {
            inner: Arc::new(AppStateInner { cfg, metrics }),
        })
    }

    pub fn cfg(&self) -> &ServerConfig {
        &self.inner.cfg
    }

    pub fn metrics(&self) -> &RouteMetrics {
        &self.inner.metrics
    }
}
