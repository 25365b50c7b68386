//! Setup-time options for the attribution pipeline.
//!
//! Every field carries a default so the struct can be built with
//! `MetricsOptions::default()` and tweaked, or deserialized from a partial
//! YAML/JSON document. `validate` runs once at setup; nothing here is
//! re-derived per request.

use serde::Deserialize;

use crate::error::{Result, RouteMetricsError};
use crate::filter::{BlacklistSpec, RouteFilter};
use crate::labels::LabelNames;

pub const DEFAULT_HISTOGRAM_NAME: &str = "http_request_duration_seconds";
pub const DEFAULT_HISTOGRAM_HELP: &str = "request duration in seconds";
pub const DEFAULT_BUCKETS: [f64; 7] = [0.05, 0.1, 0.5, 1.0, 3.0, 5.0, 10.0];

pub const DEFAULT_SUMMARY_NAME: &str = "http_request_summary_seconds";
pub const DEFAULT_SUMMARY_HELP: &str = "request duration in seconds summary";
pub const DEFAULT_PERCENTILES: [f64; 4] = [0.5, 0.9, 0.95, 0.99];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MetricsOptions {
    /// Master switch for request timing.
    pub enable_route_metrics: bool,
    /// Report `4xx` instead of `404`.
    pub group_status_codes: bool,
    pub ignore_head_requests: bool,
    /// Route label used when neither a stats id nor a route template is known.
    pub invalid_route_group: Option<String>,
    pub blacklist: Option<BlacklistSpec>,
    pub label_overrides: LabelOverrides,
    pub metrics: MetricOverrides,
    /// Prepended to both metric names.
    pub prefix: Option<String>,
    /// Scrape path. `None` installs no scrape route.
    pub endpoint: Option<String>,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            enable_route_metrics: true,
            group_status_codes: false,
            ignore_head_requests: false,
            invalid_route_group: None,
            blacklist: None,
            label_overrides: LabelOverrides::default(),
            metrics: MetricOverrides::default(),
            prefix: None,
            endpoint: None,
        }
    }
}

/// Alternate key names for the four label dimensions.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LabelOverrides {
    pub method: Option<String>,
    pub status: Option<String>,
    pub route: Option<String>,
    pub operation: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MetricOverrides {
    pub histogram: HistogramOverride,
    pub summary: SummaryOverride,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HistogramOverride {
    pub name: Option<String>,
    pub help: Option<String>,
    pub buckets: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SummaryOverride {
    pub name: Option<String>,
    pub help: Option<String>,
    pub percentiles: Option<Vec<f64>>,
}

/// Resolved histogram descriptor (prefix applied, defaults filled).
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramDescriptor {
    pub name: String,
    pub help: String,
    pub buckets: Vec<f64>,
}

/// Resolved summary descriptor (prefix applied, defaults filled).
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryDescriptor {
    pub name: String,
    pub help: String,
    pub percentiles: Vec<f64>,
}

impl MetricsOptions {
    pub fn validate(&self) -> Result<()> {
        let hist = self.histogram_descriptor();
        let sum = self.summary_descriptor();

        validate_metric_name(&hist.name)?;
        validate_metric_name(&sum.name)?;
        if hist.name == sum.name {
            return Err(RouteMetricsError::Config(format!(
                "histogram and summary must have distinct names (both are {})",
                hist.name
            )));
        }

        validate_buckets(&hist.buckets)?;
        validate_percentiles(&sum.percentiles)?;

        let names = LabelNames::from_overrides(&self.label_overrides);
        validate_label_names(&names)?;

        if let Some(endpoint) = &self.endpoint {
            if !endpoint.starts_with('/') {
                return Err(RouteMetricsError::Config(format!(
                    "endpoint must start with '/': {endpoint}"
                )));
            }
        }

        // Surfaces regex errors now instead of at first request.
        RouteFilter::compile(self.blacklist.as_ref())?;

        Ok(())
    }

    pub fn histogram_descriptor(&self) -> HistogramDescriptor {
        let o = &self.metrics.histogram;
        HistogramDescriptor {
            name: self.prefixed(o.name.as_deref().unwrap_or(DEFAULT_HISTOGRAM_NAME)),
            help: o.help.clone().unwrap_or_else(|| DEFAULT_HISTOGRAM_HELP.to_string()),
            buckets: o.buckets.clone().unwrap_or_else(|| DEFAULT_BUCKETS.to_vec()),
        }
    }

    pub fn summary_descriptor(&self) -> SummaryDescriptor {
        let o = &self.metrics.summary;
        SummaryDescriptor {
            name: self.prefixed(o.name.as_deref().unwrap_or(DEFAULT_SUMMARY_NAME)),
            help: o.help.clone().unwrap_or_else(|| DEFAULT_SUMMARY_HELP.to_string()),
            percentiles: o
                .percentiles
                .clone()
                .unwrap_or_else(|| DEFAULT_PERCENTILES.to_vec()),
        }
    }

    fn prefixed(&self, name: &str) -> String {
        match self.prefix.as_deref() {
            Some(p) if !p.is_empty() => format!("{p}{name}"),
            _ => name.to_string(),
        }
    }
}

fn validate_metric_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        _ => false,
    };
    if !valid {
        return Err(RouteMetricsError::Config(format!("invalid metric name: {name:?}")));
    }
    Ok(())
}

fn validate_label_names(names: &LabelNames) -> Result<()> {
    let all = [
        names.method.as_str(),
        names.status.as_str(),
        names.route.as_str(),
        names.operation.as_str(),
    ];
    for (i, name) in all.iter().enumerate() {
        let mut chars = name.chars();
        let valid = match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        };
        if !valid || name.starts_with("__") {
            return Err(RouteMetricsError::Config(format!("invalid label name: {name:?}")));
        }
        // Reserved by histogram buckets and summary quantiles.
        if *name == "le" || *name == "quantile" {
            return Err(RouteMetricsError::Config(format!("reserved label name: {name}")));
        }
        if all[..i].contains(name) {
            return Err(RouteMetricsError::Config(format!("duplicate label name: {name}")));
        }
    }
    Ok(())
}

fn validate_buckets(buckets: &[f64]) -> Result<()> {
    if buckets.is_empty() {
        return Err(RouteMetricsError::Config("histogram buckets must not be empty".into()));
    }
    if buckets.iter().any(|b| !b.is_finite()) {
        return Err(RouteMetricsError::Config("histogram buckets must be finite".into()));
    }
    if buckets.windows(2).any(|w| w[0] >= w[1]) {
        return Err(RouteMetricsError::Config(
            "histogram buckets must be strictly increasing".into(),
        ));
    }
    Ok(())
}

fn validate_percentiles(percentiles: &[f64]) -> Result<()> {
    if percentiles.is_empty() {
        return Err(RouteMetricsError::Config("summary percentiles must not be empty".into()));
    }
    if let Some(p) = percentiles.iter().find(|p| !(0.0..=1.0).contains(*p)) {
        return Err(RouteMetricsError::Config(format!(
            "summary percentile out of range [0, 1]: {p}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_plugin_descriptors() {
        let opts = MetricsOptions::default();
        assert!(opts.enable_route_metrics);
        assert!(opts.validate().is_ok());

        let hist = opts.histogram_descriptor();
        assert_eq!(hist.name, "http_request_duration_seconds");
        assert_eq!(hist.buckets, DEFAULT_BUCKETS.to_vec());

        let sum = opts.summary_descriptor();
        assert_eq!(sum.name, "http_request_summary_seconds");
        assert_eq!(sum.percentiles, DEFAULT_PERCENTILES.to_vec());
    }

    #[test]
    fn prefix_applies_to_both_names() {
        let opts = MetricsOptions {
            prefix: Some("api_".into()),
            ..Default::default()
        };
        assert_eq!(opts.histogram_descriptor().name, "api_http_request_duration_seconds");
        assert_eq!(opts.summary_descriptor().name, "api_http_request_summary_seconds");
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let mut opts = MetricsOptions::default();
        opts.metrics.histogram.buckets = Some(vec![0.1, 1.0]);
        let hist = opts.histogram_descriptor();
        assert_eq!(hist.name, DEFAULT_HISTOGRAM_NAME);
        assert_eq!(hist.help, DEFAULT_HISTOGRAM_HELP);
        assert_eq!(hist.buckets, vec![0.1, 1.0]);
    }

    #[test]
    fn rejects_duplicate_label_names() {
        let mut opts = MetricsOptions::default();
        opts.label_overrides.route = Some("method".into());
        let err = opts.validate().unwrap_err();
        assert_eq!(err.kind().as_str(), "CONFIG");
    }

    #[test]
    fn rejects_reserved_and_malformed_label_names() {
        for bad in ["le", "quantile", "__route", "1route", "route-name"] {
            let mut opts = MetricsOptions::default();
            opts.label_overrides.route = Some(bad.into());
            assert!(opts.validate().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn rejects_bad_buckets_and_percentiles() {
        let mut opts = MetricsOptions::default();
        opts.metrics.histogram.buckets = Some(vec![1.0, 0.5]);
        assert!(opts.validate().is_err());

        let mut opts = MetricsOptions::default();
        opts.metrics.histogram.buckets = Some(vec![]);
        assert!(opts.validate().is_err());

        let mut opts = MetricsOptions::default();
        opts.metrics.summary.percentiles = Some(vec![0.5, 1.5]);
        assert!(opts.validate().is_err());
    }

    #[test]
    fn rejects_bad_names_and_endpoint() {
        let opts = MetricsOptions {
            prefix: Some("my-app_".into()),
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = MetricsOptions {
            endpoint: Some("metrics".into()),
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let mut opts = MetricsOptions::default();
        opts.metrics.summary.name = Some(DEFAULT_HISTOGRAM_NAME.into());
        assert!(opts.validate().is_err());
    }

    #[test]
    fn deserializes_partial_yaml() {
        let yaml = r#"
endpoint: /metrics
invalid_route_group: INVALID_GROUP
group_status_codes: true
label_overrides:
  method: http_method
metrics:
  summary:
    percentiles: [0.5, 0.99]
"#;
        let opts: MetricsOptions = serde_yaml::from_str(yaml).unwrap();
        assert!(opts.enable_route_metrics);
        assert!(opts.group_status_codes);
        assert_eq!(opts.endpoint.as_deref(), Some("/metrics"));
        assert_eq!(opts.invalid_route_group.as_deref(), Some("INVALID_GROUP"));
        assert_eq!(opts.label_overrides.method.as_deref(), Some("http_method"));
        assert_eq!(opts.summary_descriptor().percentiles, vec![0.5, 0.99]);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = "enable_route_metric: false\n";
        assert!(serde_yaml::from_str::<MetricsOptions>(yaml).is_err());
    }
}
