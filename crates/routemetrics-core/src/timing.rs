//! Per-request timing scope.
//!
//! A `TimingScope` holds one stop timer per aggregation. Each timer captures
//! its own start instant and is consumed when stopped, so a scope records at
//! most one observation per aggregation. Dropping a scope without finishing
//! it records nothing.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::labels::LabelSet;

/// Seam to the statistics engine. Implementations must be safe to call from
/// many requests at once.
pub trait Observer: Send + Sync {
    fn observe(&self, labels: &LabelSet, elapsed: Duration) -> Result<()>;
}

/// Running timer bound to one aggregation.
#[must_use = "a stop timer records nothing unless stopped"]
pub struct StopTimer {
    started: Instant,
    sink: Arc<dyn Observer>,
}

impl StopTimer {
    pub fn start(sink: Arc<dyn Observer>) -> Self {
        Self {
            started: Instant::now(),
            sink,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Commit the elapsed time under `labels`.
    pub fn stop(self, labels: &LabelSet) -> Result<Duration> {
        let elapsed = self.started.elapsed();
        self.sink.observe(labels, elapsed)?;
        Ok(elapsed)
    }
}

impl fmt::Debug for StopTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopTimer")
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

/// Pending measurement for one in-flight request.
#[derive(Debug)]
#[must_use = "dropping a timing scope abandons the measurement"]
pub struct TimingScope {
    hist: Option<StopTimer>,
    sum: Option<StopTimer>,
}

impl TimingScope {
    pub fn open(hist: Arc<dyn Observer>, sum: Arc<dyn Observer>) -> Self {
        Self {
            hist: Some(StopTimer::start(hist)),
            sum: Some(StopTimer::start(sum)),
        }
    }

    /// Stop the histogram timer. `Ok(None)` if it was already stopped.
    pub fn hist(&mut self, labels: &LabelSet) -> Result<Option<Duration>> {
        self.hist.take().map(|t| t.stop(labels)).transpose()
    }

    /// Stop the summary timer. `Ok(None)` if it was already stopped.
    pub fn sum(&mut self, labels: &LabelSet) -> Result<Option<Duration>> {
        self.sum.take().map(|t| t.stop(labels)).transpose()
    }

    pub fn is_pending(&self) -> bool {
        self.hist.is_some() || self.sum.is_some()
    }

    /// Stop whatever is still running with the same label set.
    /// Both timers are attempted even if the first one fails.
    pub fn finish(mut self, labels: &LabelSet) -> Result<()> {
        let sum = self.sum(labels);
        let hist = self.hist(labels);
        sum?;
        hist?;
        Ok(())
    }
}
