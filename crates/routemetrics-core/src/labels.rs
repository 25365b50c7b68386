//! Label attribution: completed request -> label set.
//!
//! Route precedence (first non-empty wins):
//! 1. stats id declared by the handler
//! 2. route template matched by the router
//! 3. configured invalid-route group
//! 4. raw request path
//!
//! Step 4 has unbounded cardinality; deployments exposed to arbitrary paths
//! should set `invalid_route_group`.

use std::collections::BTreeMap;

use crate::options::{LabelOverrides, MetricsOptions};

/// Key names of the four label dimensions, fixed at setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelNames {
    pub method: String,
    pub status: String,
    pub route: String,
    pub operation: String,
}

impl Default for LabelNames {
    fn default() -> Self {
        Self {
            method: "method".into(),
            status: "status_code".into(),
            route: "route".into(),
            operation: "operation".into(),
        }
    }
}

impl LabelNames {
    /// Empty overrides fall back to the default name.
    pub fn from_overrides(o: &LabelOverrides) -> Self {
        let d = Self::default();
        let pick = |v: &Option<String>, default: String| match v.as_deref() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => default,
        };
        Self {
            method: pick(&o.method, d.method),
            status: pick(&o.status, d.status),
            route: pick(&o.route, d.route),
            operation: pick(&o.operation, d.operation),
        }
    }
}

/// Label name -> value, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Snapshot of a finished request, as seen by the response hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestCompletion<'a> {
    pub method: &'a str,
    /// Request path without query string.
    pub raw_path: &'a str,
    /// Template the router matched, e.g. `/users/:id`.
    pub route_template: Option<&'a str>,
    /// Handler-declared override of the route identity.
    pub stats_id: Option<&'a str>,
    pub status: u16,
    /// Value of the `operation` query parameter.
    pub operation: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct LabelResolver {
    names: LabelNames,
    group_status_codes: bool,
    invalid_route_group: Option<String>,
}

impl LabelResolver {
    pub fn new(
        names: LabelNames,
        group_status_codes: bool,
        invalid_route_group: Option<String>,
    ) -> Self {
        Self {
            names,
            group_status_codes,
            invalid_route_group,
        }
    }

    pub fn from_options(opts: &MetricsOptions) -> Self {
        Self::new(
            LabelNames::from_overrides(&opts.label_overrides),
            opts.group_status_codes,
            opts.invalid_route_group.clone(),
        )
    }

    pub fn names(&self) -> &LabelNames {
        &self.names
    }

    pub fn resolve(&self, ctx: &RequestCompletion<'_>) -> LabelSet {
        let mut labels = LabelSet::new();
        labels.insert(self.names.method.as_str(), ctx.method);
        labels.insert(self.names.route.as_str(), self.route(ctx));
        labels.insert(self.names.status.as_str(), self.status(ctx.status));
        if let Some(op) = ctx.operation.filter(|op| !op.is_empty()) {
            labels.insert(self.names.operation.as_str(), op);
        }
        labels
    }

    pub fn route<'a>(&'a self, ctx: &RequestCompletion<'a>) -> &'a str {
        non_empty(ctx.stats_id)
            .or_else(|| non_empty(ctx.route_template))
            .or_else(|| non_empty(self.invalid_route_group.as_deref()))
            .unwrap_or(ctx.raw_path)
    }

    pub fn status(&self, status: u16) -> String {
        if self.group_status_codes {
            format!("{}xx", status / 100)
        } else {
            status.to_string()
        }
    }
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.filter(|s| !s.is_empty())
}
