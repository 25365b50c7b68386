//! Route metrics for axum routers.
//!
//! `RouteMetrics` is built once from `MetricsOptions`: it validates the
//! options, creates and registers the two aggregations and compiles the
//! request hooks. `MetricsRouter::with_route_metrics` then installs the
//! scrape route (when `endpoint` is set) and the timing middleware.
//!
//! Requests that are being timed carry a `RequestTimer` in their extensions;
//! handlers may stop either timer early with their own labels.
//!
//! The middleware is added with `Router::layer`, which axum applies per
//! route, so the matched template (`MatchedPath`) is visible before the
//! handler runs and the 404 fallback is timed too. Routes added after
//! `with_route_metrics` are not instrumented.

use std::borrow::Cow;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::{IntoResponseParts, Response, ResponseParts},
    routing::get,
    Extension, Router,
};
use parking_lot::Mutex;
use prometheus::Registry;

use routemetrics_core::{
    LabelSet, MetricsOptions, RequestCompletion, RequestHooks, Result, TimingScope,
};

use crate::obs::{MetricsClient, RouteHistogram, RouteSummary};
use crate::ops;

/// Route identity declared by a handler; beats the router's template.
///
/// ```ignore
/// async fn show_user(Path(id): Path<u64>) -> impl IntoResponse {
///     (StatsId::new("users.show"), format!("user {id}"))
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsId(Cow<'static, str>);

impl StatsId {
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl IntoResponseParts for StatsId {
    type Error = Infallible;

    fn into_response_parts(
        self,
        mut res: ResponseParts,
    ) -> std::result::Result<ResponseParts, Infallible> {
        res.extensions_mut().insert(self);
        Ok(res)
    }
}

/// Pending timing scope of one request, shared with its handler.
///
/// Only present on requests that passed the request hook, so handlers take
/// it as `Option<Extension<RequestTimer>>`. Each timer stops at most once:
/// whatever the handler has not stopped is finished by the middleware.
#[derive(Debug, Clone)]
pub struct RequestTimer(Arc<Mutex<Option<TimingScope>>>);

impl RequestTimer {
    fn new(scope: TimingScope) -> Self {
        Self(Arc::new(Mutex::new(Some(scope))))
    }

    /// Stop the histogram timer. `Ok(None)` if it was already stopped.
    pub fn hist(&self, labels: &LabelSet) -> Result<Option<Duration>> {
        match self.0.lock().as_mut() {
            Some(scope) => scope.hist(labels),
            None => Ok(None),
        }
    }

    /// Stop the summary timer. `Ok(None)` if it was already stopped.
    pub fn sum(&self, labels: &LabelSet) -> Result<Option<Duration>> {
        match self.0.lock().as_mut() {
            Some(scope) => scope.sum(labels),
            None => Ok(None),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.0.lock().as_ref().is_some_and(TimingScope::is_pending)
    }

    fn take(&self) -> Option<TimingScope> {
        self.0.lock().take()
    }
}

/// Route metrics setup: options, aggregations, hooks, registry handle.
#[derive(Clone)]
pub struct RouteMetrics {
    inner: Arc<RouteMetricsInner>,
}

struct RouteMetricsInner {
    options: MetricsOptions,
    client: MetricsClient,
    custom_registry: bool,
    histogram: RouteHistogram,
    summary: RouteSummary,
    hooks: RequestHooks,
}

impl RouteMetrics {
    /// Validate options and register the aggregations.
    ///
    /// `registry = None` uses the process-wide default registry.
    /// Errors here are setup errors and should stop the server from starting.
    pub fn new(options: MetricsOptions, registry: Option<Registry>) -> Result<Self> {
        options.validate()?;

        let custom_registry = registry.is_some();
        let client = registry
            .map(MetricsClient::new)
            .unwrap_or_else(MetricsClient::global);

        let histogram = RouteHistogram::new(&options.histogram_descriptor())?;
        let summary = RouteSummary::new(&options.summary_descriptor())?;
        if options.enable_route_metrics {
            client.register_route(Box::new(histogram.clone()))?;
            client.register_route(Box::new(summary.clone()))?;
        }

        let hooks = RequestHooks::new(
            &options,
            Arc::new(histogram.clone()),
            Arc::new(summary.clone()),
        )?;

        tracing::info!(
            histogram = histogram.name(),
            summary = summary.name(),
            endpoint = options.endpoint.as_deref().unwrap_or("-"),
            route_metrics = options.enable_route_metrics,
            "route metrics configured"
        );

        Ok(Self {
            inner: Arc::new(RouteMetricsInner {
                options,
                client,
                custom_registry,
                histogram,
                summary,
                hooks,
            }),
        })
    }

    pub fn options(&self) -> &MetricsOptions {
        &self.inner.options
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.inner.options.endpoint.as_deref()
    }

    /// Raw statistics-engine handle for custom metrics.
    pub fn client(&self) -> &MetricsClient {
        &self.inner.client
    }

    pub fn hooks(&self) -> &RequestHooks {
        &self.inner.hooks
    }

    pub fn histogram(&self) -> &RouteHistogram {
        &self.inner.histogram
    }

    pub fn summary(&self) -> &RouteSummary {
        &self.inner.summary
    }

    /// Clear the registry supplied at setup: unregister the collectors added
    /// through `client().register` and drop recorded route series.
    /// No-op on the default registry.
    pub fn clear_register(&self) {
        if !self.inner.custom_registry {
            return;
        }
        self.inner.client.clear();
        self.inner.histogram.clear();
        self.inner.summary.clear();
        tracing::debug!("route metrics cleared");
    }

    /// Text exposition of the whole registry.
    pub fn scrape(&self) -> Result<String> {
        self.inner.client.render()
    }
}

/// Value of the `operation` query parameter, if present and non-empty.
pub fn operation_param(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == "operation")
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// Timing middleware: request hook before `next`, response hook after.
pub async fn track_route_metrics(
    State(metrics): State<RouteMetrics>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let raw_url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let Some(scope) = metrics.hooks().on_request(method.as_str(), &raw_url) else {
        return next.run(request).await;
    };

    let path = request.uri().path().to_owned();
    let operation = operation_param(request.uri().query());
    let route_template = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned());

    let timer = RequestTimer::new(scope);
    request.extensions_mut().insert(timer.clone());

    // Dropped unobserved if the connection goes away before this returns.
    let response = next.run(request).await;

    let stats_id = response.extensions().get::<StatsId>().cloned();
    let done = RequestCompletion {
        method: method.as_str(),
        raw_path: &path,
        route_template: route_template.as_deref(),
        stats_id: stats_id.as_ref().map(StatsId::as_str),
        status: response.status().as_u16(),
        operation: operation.as_deref(),
    };
    metrics.hooks().on_response(timer.take(), &done);

    response
}

/// Extension trait installing route metrics on a router.
pub trait MetricsRouter {
    /// Add the scrape route (if configured), the timing middleware, and an
    /// `Extension<RouteMetrics>` for handlers.
    fn with_route_metrics(self, metrics: RouteMetrics) -> Self;
}

impl<S> MetricsRouter for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_route_metrics(self, metrics: RouteMetrics) -> Self {
        let router = match metrics.endpoint().map(str::to_owned) {
            Some(endpoint) => self.route(&endpoint, get(ops::scrape).with_state(metrics.clone())),
            None => self,
        };

        router
            .layer(middleware::from_fn_with_state(
                metrics.clone(),
                track_route_metrics,
            ))
            .layer(Extension(metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routemetrics_core::LabelSet;

    #[test]
    fn operation_param_parsing() {
        assert_eq!(operation_param(None), None);
        assert_eq!(operation_param(Some("")), None);
        assert_eq!(operation_param(Some("operation=")), None);
        assert_eq!(
            operation_param(Some("a=1&operation=listUsers")).as_deref(),
            Some("listUsers")
        );
        assert_eq!(
            operation_param(Some("operation=get%20user")).as_deref(),
            Some("get user")
        );
        // malformed input never fails
        assert_eq!(operation_param(Some("%%%&&=")), None);
    }

    #[test]
    fn clear_register_is_noop_on_default_registry() {
        let metrics = RouteMetrics::new(
            MetricsOptions {
                prefix: Some("plugin_unit_noop_".into()),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        let labels: LabelSet = [("method", "GET"), ("route", "/x"), ("status_code", "200")]
            .into_iter()
            .collect();
        let scope = metrics.hooks().on_request("GET", "/x").unwrap();
        scope.finish(&labels).unwrap();

        metrics.clear_register();
        assert_eq!(metrics.histogram().sample_count(&labels), 1);
        assert_eq!(metrics.summary().sample_count(&labels), 1);
    }

    #[test]
    fn clear_register_empties_custom_registry() {
        let metrics = RouteMetrics::new(MetricsOptions::default(), Some(Registry::new())).unwrap();
        let labels: LabelSet = [("method", "GET"), ("route", "/x"), ("status_code", "200")]
            .into_iter()
            .collect();
        metrics
            .hooks()
            .on_request("GET", "/x")
            .unwrap()
            .finish(&labels)
            .unwrap();

        metrics.clear_register();
        assert_eq!(metrics.histogram().sample_count(&labels), 0);
        assert!(!metrics.scrape().unwrap().contains("route=\"/x\""));
    }

    #[test]
    fn clear_register_unregisters_custom_collectors() {
        let metrics = RouteMetrics::new(MetricsOptions::default(), Some(Registry::new())).unwrap();
        let counter = prometheus::IntCounter::new("app_jobs_total", "jobs processed").unwrap();
        metrics.client().register(counter.clone()).unwrap();
        counter.inc();
        assert!(metrics.scrape().unwrap().contains("app_jobs_total 1"));

        metrics.clear_register();
        assert!(!metrics.scrape().unwrap().contains("app_jobs_total"));
        // route metrics keep recording after a clear
        let labels: LabelSet = [("method", "GET"), ("route", "/x"), ("status_code", "200")]
            .into_iter()
            .collect();
        let scope = metrics.hooks().on_request("GET", "/x").unwrap();
        scope.finish(&labels).unwrap();
        let text = metrics.scrape().unwrap();
        assert!(text.contains(
            r#"http_request_duration_seconds_count{method="GET",route="/x",status_code="200"} 1"#
        ));
    }

    #[test]
    fn request_timer_stops_each_aggregation_once() {
        let metrics = RouteMetrics::new(MetricsOptions::default(), Some(Registry::new())).unwrap();
        let labels: LabelSet = [("method", "GET"), ("route", "/x"), ("status_code", "200")]
            .into_iter()
            .collect();
        let timer = RequestTimer::new(metrics.hooks().on_request("GET", "/x").unwrap());

        assert!(timer.hist(&labels).unwrap().is_some());
        assert!(timer.hist(&labels).unwrap().is_none());
        assert!(timer.is_pending());

        let scope = timer.take().unwrap();
        assert!(timer.sum(&labels).unwrap().is_none());
        scope.finish(&labels).unwrap();
        assert!(!timer.is_pending());

        assert_eq!(metrics.histogram().sample_count(&labels), 1);
        assert_eq!(metrics.summary().sample_count(&labels), 1);
    }

    #[test]
    fn invalid_options_fail_setup() {
        let mut opts = MetricsOptions::default();
        opts.label_overrides.status = Some("le".into());
        let err = RouteMetrics::new(opts, Some(Registry::new())).err().unwrap();
        assert_eq!(err.kind().as_str(), "CONFIG");
    }

    #[test]
    fn disabled_route_metrics_registers_nothing() {
        let metrics = RouteMetrics::new(
            MetricsOptions {
                enable_route_metrics: false,
                ..Default::default()
            },
            Some(Registry::new()),
        )
        .unwrap();
        assert!(metrics.hooks().on_request("GET", "/x").is_none());
        assert!(metrics.client().gather().is_empty());
    }
}
