//! Request lifecycle hooks (framework-agnostic).
//!
//! `on_request` runs before application handlers and decides whether the
//! request is timed. `on_response` runs once the response is final, resolves
//! the label set and stops both timers. The scope returned by `on_request` is
//! owned by the caller (one per request) and moved into `on_response`.
//!
//! Neither hook fails the request. Engine rejections are logged and dropped.

use std::sync::Arc;

use crate::error::Result;
use crate::filter::RouteFilter;
use crate::labels::{LabelResolver, LabelSet, RequestCompletion};
use crate::options::MetricsOptions;
use crate::timing::{Observer, TimingScope};

pub struct RequestHooks {
    enabled: bool,
    ignore_head: bool,
    filter: RouteFilter,
    resolver: LabelResolver,
    hist: Arc<dyn Observer>,
    sum: Arc<dyn Observer>,
}

impl RequestHooks {
    /// Compile options into hooks bound to the two aggregations.
    pub fn new(
        opts: &MetricsOptions,
        hist: Arc<dyn Observer>,
        sum: Arc<dyn Observer>,
    ) -> Result<Self> {
        Ok(Self {
            enabled: opts.enable_route_metrics,
            ignore_head: opts.ignore_head_requests,
            filter: RouteFilter::compile(opts.blacklist.as_ref())?,
            resolver: LabelResolver::from_options(opts),
            hist,
            sum,
        })
    }

    pub fn resolver(&self) -> &LabelResolver {
        &self.resolver
    }

    pub fn filter(&self) -> &RouteFilter {
        &self.filter
    }

    /// Request-received hook. `raw_url` is the path with its query string.
    pub fn on_request(&self, method: &str, raw_url: &str) -> Option<TimingScope> {
        if self.ignore_head && method.eq_ignore_ascii_case("HEAD") {
            tracing::trace!(%method, %raw_url, "head request not timed");
            return None;
        }
        if !self.enabled || raw_url.is_empty() || !self.filter.should_collect(raw_url) {
            tracing::trace!(%method, %raw_url, "request not timed");
            return None;
        }
        Some(TimingScope::open(Arc::clone(&self.hist), Arc::clone(&self.sum)))
    }

    /// Response-sent hook. Returns the labels used when a scope was pending.
    pub fn on_response(
        &self,
        scope: Option<TimingScope>,
        done: &RequestCompletion<'_>,
    ) -> Option<LabelSet> {
        let scope = scope?;
        let labels = self.resolver.resolve(done);
        if let Err(e) = scope.finish(&labels) {
            tracing::error!(error = %e, ?labels, "route metrics observation rejected");
        }
        Some(labels)
    }
}
