//! Route latency aggregations backed by the `prometheus` registry.
//!
//! Series are keyed by the full resolved `LabelSet` and kept in a `DashMap`,
//! so a series may carry three labels or four (`operation` is optional)
//! under one metric name. Bucket math comes from `prometheus::Histogram`;
//! quantile estimation comes from `hdrhistogram`. Both collectors export
//! through the registry's text encoder.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use hdrhistogram::Histogram as HdrHistogram;
use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::{proto, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};

use routemetrics_core::options::{HistogramDescriptor, SummaryDescriptor};
use routemetrics_core::{LabelSet, Observer, Result, RouteMetricsError};

const MICROS_PER_SEC: f64 = 1_000_000.0;
// hdrhistogram precision (significant decimal digits).
const SIGFIG: u8 = 3;

fn engine_err(e: prometheus::Error) -> RouteMetricsError {
    RouteMetricsError::Engine(e.to_string())
}

fn label_pairs(labels: &LabelSet) -> Vec<proto::LabelPair> {
    labels
        .iter()
        .map(|(k, v)| {
            let mut pair = proto::LabelPair::default();
            pair.set_name(k.to_string());
            pair.set_value(v.to_string());
            pair
        })
        .collect()
}

fn family(desc: &Desc, kind: proto::MetricType) -> proto::MetricFamily {
    let mut mf = proto::MetricFamily::default();
    mf.set_name(desc.fq_name.clone());
    mf.set_help(desc.help.clone());
    mf.set_field_type(kind);
    mf
}

/// Bucketed request-duration histogram (seconds).
#[derive(Clone)]
pub struct RouteHistogram {
    inner: Arc<HistogramInner>,
}

struct HistogramInner {
    desc: Desc,
    opts: HistogramOpts,
    series: DashMap<LabelSet, Histogram>,
}

impl RouteHistogram {
    pub fn new(d: &HistogramDescriptor) -> Result<Self> {
        let desc = Desc::new(d.name.clone(), d.help.clone(), vec![], HashMap::new())
            .map_err(engine_err)?;
        let opts = HistogramOpts::new(d.name.clone(), d.help.clone()).buckets(d.buckets.clone());
        Ok(Self {
            inner: Arc::new(HistogramInner {
                desc,
                opts,
                series: DashMap::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.desc.fq_name
    }

    fn series(&self, labels: &LabelSet) -> Result<Histogram> {
        if let Some(h) = self.inner.series.get(labels) {
            return Ok(h.clone());
        }
        let const_labels: HashMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let h = Histogram::with_opts(self.inner.opts.clone().const_labels(const_labels))
            .map_err(engine_err)?;
        Ok(self.inner.series.entry(labels.clone()).or_insert(h).clone())
    }

    pub fn sample_count(&self, labels: &LabelSet) -> u64 {
        self.inner
            .series
            .get(labels)
            .map(|h| h.get_sample_count())
            .unwrap_or(0)
    }

    pub fn sample_sum(&self, labels: &LabelSet) -> f64 {
        self.inner
            .series
            .get(labels)
            .map(|h| h.get_sample_sum())
            .unwrap_or(0.0)
    }

    pub fn series_count(&self) -> usize {
        self.inner.series.len()
    }

    /// Drop every series.
    pub fn clear(&self) {
        self.inner.series.clear();
    }
}

impl Observer for RouteHistogram {
    fn observe(&self, labels: &LabelSet, elapsed: Duration) -> Result<()> {
        self.series(labels)?.observe(elapsed.as_secs_f64());
        Ok(())
    }
}

impl Collector for RouteHistogram {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.inner.desc]
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        let mut mf = family(&self.inner.desc, proto::MetricType::HISTOGRAM);
        for entry in self.inner.series.iter() {
            for mut child in entry.value().collect() {
                for m in child.take_metric().into_iter() {
                    mf.mut_metric().push(m);
                }
            }
        }
        vec![mf]
    }
}

struct SummarySeries {
    sketch: HdrHistogram<u64>,
    sum: f64,
}

impl SummarySeries {
    fn new() -> Result<Self> {
        let sketch = HdrHistogram::new(SIGFIG)
            .map_err(|e| RouteMetricsError::Engine(format!("summary sketch: {e:?}")))?;
        Ok(Self { sketch, sum: 0.0 })
    }

    fn record(&mut self, elapsed: Duration) -> Result<()> {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.sketch
            .record(micros)
            .map_err(|e| RouteMetricsError::Engine(format!("summary record: {e:?}")))?;
        self.sum += elapsed.as_secs_f64();
        Ok(())
    }
}

/// Request-duration summary with streaming quantiles (seconds).
#[derive(Clone)]
pub struct RouteSummary {
    inner: Arc<SummaryInner>,
}

struct SummaryInner {
    desc: Desc,
    percentiles: Vec<f64>,
    series: DashMap<LabelSet, Mutex<SummarySeries>>,
}

impl RouteSummary {
    pub fn new(d: &SummaryDescriptor) -> Result<Self> {
        let desc = Desc::new(d.name.clone(), d.help.clone(), vec![], HashMap::new())
            .map_err(engine_err)?;
        Ok(Self {
            inner: Arc::new(SummaryInner {
                desc,
                percentiles: d.percentiles.clone(),
                series: DashMap::new(),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.desc.fq_name
    }

    pub fn sample_count(&self, labels: &LabelSet) -> u64 {
        self.inner
            .series
            .get(labels)
            .map(|s| s.lock().sketch.len())
            .unwrap_or(0)
    }

    /// Estimated quantile in seconds, `None` when the series is absent.
    pub fn quantile(&self, labels: &LabelSet, q: f64) -> Option<f64> {
        self.inner
            .series
            .get(labels)
            .map(|s| s.lock().sketch.value_at_quantile(q) as f64 / MICROS_PER_SEC)
    }

    pub fn series_count(&self) -> usize {
        self.inner.series.len()
    }

    pub fn clear(&self) {
        self.inner.series.clear();
    }
}

impl Observer for RouteSummary {
    fn observe(&self, labels: &LabelSet, elapsed: Duration) -> Result<()> {
        if let Some(series) = self.inner.series.get(labels) {
            return series.lock().record(elapsed);
        }
        let fresh = SummarySeries::new()?;
        let series = self
            .inner
            .series
            .entry(labels.clone())
            .or_insert_with(|| Mutex::new(fresh));
        let mut guard = series.lock();
        guard.record(elapsed)
    }
}

impl Collector for RouteSummary {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.inner.desc]
    }

    fn collect(&self) -> Vec<proto::MetricFamily> {
        let mut mf = family(&self.inner.desc, proto::MetricType::SUMMARY);
        for entry in self.inner.series.iter() {
            let series = entry.value().lock();

            let quantiles: Vec<proto::Quantile> = self
                .inner
                .percentiles
                .iter()
                .map(|&q| {
                    let mut pq = proto::Quantile::default();
                    pq.set_quantile(q);
                    pq.set_value(series.sketch.value_at_quantile(q) as f64 / MICROS_PER_SEC);
                    pq
                })
                .collect();

            let mut summary = proto::Summary::default();
            summary.set_sample_count(series.sketch.len());
            summary.set_sample_sum(series.sum);
            summary.set_quantile(quantiles.into());

            let mut metric = proto::Metric::default();
            metric.set_label(label_pairs(entry.key()).into());
            metric.set_summary(summary);
            mf.mut_metric().push(metric);
        }
        vec![mf]
    }
}

/// Handle on the statistics registry exposed to application code.
#[derive(Clone)]
pub struct MetricsClient {
    registry: Registry,
    // application collectors, unregistered again by `clear`
    registered: Arc<Mutex<Vec<Box<dyn Collector>>>>,
}

impl MetricsClient {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            registered: Arc::default(),
        }
    }

    /// Process-wide default registry.
    pub fn global() -> Self {
        Self::new(prometheus::default_registry().clone())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register an application collector next to the route metrics.
    pub fn register<C>(&self, collector: C) -> Result<()>
    where
        C: Collector + Clone + 'static,
    {
        self.registry
            .register(Box::new(collector.clone()))
            .map_err(engine_err)?;
        self.registered.lock().push(Box::new(collector));
        Ok(())
    }

    /// Route aggregations stay registered for the client's lifetime.
    pub(crate) fn register_route(&self, collector: Box<dyn Collector>) -> Result<()> {
        self.registry.register(collector).map_err(engine_err)
    }

    /// Unregister every collector added through `register`.
    pub fn clear(&self) {
        let collectors: Vec<_> = self.registered.lock().drain(..).collect();
        for c in collectors {
            if let Err(e) = self.registry.unregister(c) {
                tracing::warn!(error = %e, "unregister collector failed");
            }
        }
    }

    pub fn gather(&self) -> Vec<proto::MetricFamily> {
        self.registry.gather()
    }

    /// Text exposition of every registered series.
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|e| RouteMetricsError::Scrape(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| RouteMetricsError::Scrape(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routemetrics_core::options::MetricsOptions;

    fn labels(route: &str) -> LabelSet {
        [("method", "GET"), ("route", route), ("status_code", "200")]
            .into_iter()
            .collect()
    }

    fn client_with_both() -> (MetricsClient, RouteHistogram, RouteSummary) {
        let opts = MetricsOptions::default();
        let hist = RouteHistogram::new(&opts.histogram_descriptor()).unwrap();
        let sum = RouteSummary::new(&opts.summary_descriptor()).unwrap();
        let client = MetricsClient::new(Registry::new());
        client.register_route(Box::new(hist.clone())).unwrap();
        client.register_route(Box::new(sum.clone())).unwrap();
        (client, hist, sum)
    }

    #[test]
    fn histogram_counts_and_sums_per_series() {
        let (_, hist, _) = client_with_both();
        hist.observe(&labels("/a"), Duration::from_millis(20)).unwrap();
        hist.observe(&labels("/a"), Duration::from_millis(30)).unwrap();
        hist.observe(&labels("/b"), Duration::from_millis(5)).unwrap();

        assert_eq!(hist.sample_count(&labels("/a")), 2);
        assert_eq!(hist.sample_count(&labels("/b")), 1);
        assert_eq!(hist.sample_count(&labels("/missing")), 0);
        assert!((hist.sample_sum(&labels("/a")) - 0.05).abs() < 1e-6);
        assert_eq!(hist.series_count(), 2);
    }

    #[test]
    fn summary_quantiles_are_in_seconds() {
        let (_, _, sum) = client_with_both();
        for ms in 1..=100 {
            sum.observe(&labels("/a"), Duration::from_millis(ms)).unwrap();
        }
        assert_eq!(sum.sample_count(&labels("/a")), 100);
        let p50 = sum.quantile(&labels("/a"), 0.5).unwrap();
        assert!((0.045..=0.055).contains(&p50), "p50 was {p50}");
        let p99 = sum.quantile(&labels("/a"), 0.99).unwrap();
        assert!((0.095..=0.101).contains(&p99), "p99 was {p99}");
        assert!(sum.quantile(&labels("/missing"), 0.5).is_none());
    }

    #[test]
    fn series_with_and_without_operation_share_a_family() {
        let (client, hist, sum) = client_with_both();
        let mut with_op = labels("/graphql");
        with_op.insert("operation", "listUsers");
        for l in [labels("/graphql"), with_op] {
            hist.observe(&l, Duration::from_millis(1)).unwrap();
            sum.observe(&l, Duration::from_millis(1)).unwrap();
        }

        let families = client.gather();
        assert_eq!(families.len(), 2);
        for mf in &families {
            assert_eq!(mf.get_metric().len(), 2);
        }

        let text = client.render().unwrap();
        assert!(text.contains(
            "http_request_duration_seconds_count{method=\"GET\",operation=\"listUsers\",route=\"/graphql\",status_code=\"200\"} 1"
        ));
        assert!(text.contains(
            "http_request_duration_seconds_count{method=\"GET\",route=\"/graphql\",status_code=\"200\"} 1"
        ));
        assert!(!text.contains("operation=\"\""));
    }

    #[test]
    fn render_includes_help_type_and_quantiles() {
        let (client, hist, sum) = client_with_both();
        hist.observe(&labels("/test"), Duration::from_millis(10)).unwrap();
        sum.observe(&labels("/test"), Duration::from_millis(10)).unwrap();

        let text = client.render().unwrap();
        assert!(text.contains("# HELP http_request_duration_seconds request duration in seconds"));
        assert!(text.contains("# TYPE http_request_duration_seconds histogram"));
        assert!(text.contains("le=\"0.05\""));
        assert!(text.contains(
            "# HELP http_request_summary_seconds request duration in seconds summary"
        ));
        assert!(text.contains("# TYPE http_request_summary_seconds summary"));
        assert!(text.contains("quantile=\"0.99\""));
        assert!(text.contains(
            "http_request_summary_seconds_count{method=\"GET\",route=\"/test\",status_code=\"200\"} 1"
        ));
    }

    #[test]
    fn clear_drops_series() {
        let (client, hist, sum) = client_with_both();
        hist.observe(&labels("/test"), Duration::from_millis(1)).unwrap();
        sum.observe(&labels("/test"), Duration::from_millis(1)).unwrap();
        hist.clear();
        sum.clear();
        assert_eq!(hist.series_count(), 0);
        assert_eq!(sum.series_count(), 0);
        assert!(!client.render().unwrap().contains("route=\"/test\""));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let (client, hist, _) = client_with_both();
        let err = client.register(hist.clone()).unwrap_err();
        assert_eq!(err.kind().as_str(), "ENGINE");
    }

    #[test]
    fn clear_unregisters_application_collectors_only() {
        let (client, hist, _) = client_with_both();
        let counter = prometheus::IntCounter::new("jobs_total", "jobs").unwrap();
        client.register(counter.clone()).unwrap();
        counter.inc();
        hist.observe(&labels("/test"), Duration::from_millis(1)).unwrap();
        assert!(client.render().unwrap().contains("jobs_total 1"));

        client.clear();
        let text = client.render().unwrap();
        assert!(!text.contains("jobs_total"));
        assert!(text.contains("http_request_duration_seconds_count"));

        // the name is free again
        client.register(counter).unwrap();
    }
}
