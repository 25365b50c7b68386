//! Path exclusion rules.
//!
//! The blacklist is configured in one of several shapes and compiled once
//! into a `BlacklistRule`. Matching runs against the path with any query
//! string removed.

use std::collections::HashSet;

use regex::Regex;
use serde::de::IgnoredAny;
use serde::Deserialize;

use crate::error::{Result, RouteMetricsError};

/// Blacklist as written in configuration.
///
/// YAML shapes: `"/health"`, `["/health", "/ready"]`, `{ pattern: "^/internal" }`.
/// Anything else lands in `Unrecognized` and excludes every path.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BlacklistSpec {
    Exact(String),
    Set(Vec<String>),
    Pattern { pattern: String },
    Unrecognized(IgnoredAny),
}

impl BlacklistSpec {
    pub fn pattern(pattern: impl Into<String>) -> Self {
        BlacklistSpec::Pattern {
            pattern: pattern.into(),
        }
    }
}

/// Compiled blacklist.
#[derive(Debug, Clone)]
pub enum BlacklistRule {
    None,
    Exact(String),
    Set(HashSet<String>),
    Pattern(Regex),
    /// Misconfigured blacklist: nothing is collected.
    RejectAll,
}

#[derive(Debug, Clone)]
pub struct RouteFilter {
    rule: BlacklistRule,
}

impl Default for RouteFilter {
    fn default() -> Self {
        Self {
            rule: BlacklistRule::None,
        }
    }
}

impl RouteFilter {
    pub fn new(rule: BlacklistRule) -> Self {
        Self { rule }
    }

    pub fn compile(spec: Option<&BlacklistSpec>) -> Result<Self> {
        let rule = match spec {
            None => BlacklistRule::None,
            Some(BlacklistSpec::Exact(path)) => BlacklistRule::Exact(path.clone()),
            Some(BlacklistSpec::Set(paths)) => BlacklistRule::Set(paths.iter().cloned().collect()),
            Some(BlacklistSpec::Pattern { pattern }) => {
                let re = Regex::new(pattern).map_err(|e| {
                    RouteMetricsError::Config(format!("invalid blacklist pattern {pattern:?}: {e}"))
                })?;
                BlacklistRule::Pattern(re)
            }
            Some(BlacklistSpec::Unrecognized(_)) => {
                tracing::warn!("unrecognized blacklist shape; route metrics will not be collected");
                BlacklistRule::RejectAll
            }
        };
        Ok(Self { rule })
    }

    pub fn rule(&self) -> &BlacklistRule {
        &self.rule
    }

    /// Whether a request for `raw_url` (path plus optional query) is timed.
    pub fn should_collect(&self, raw_url: &str) -> bool {
        let path = strip_query(raw_url);
        match &self.rule {
            BlacklistRule::None => true,
            BlacklistRule::Exact(p) => p != path,
            BlacklistRule::Set(set) => !set.contains(path),
            BlacklistRule::Pattern(re) => !re.is_match(path),
            BlacklistRule::RejectAll => false,
        }
    }
}

/// Everything before the first `?`.
pub fn strip_query(raw_url: &str) -> &str {
    match raw_url.split_once('?') {
        Some((path, _)) => path,
        None => raw_url,
    }
}
