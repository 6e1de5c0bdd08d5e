//! Metrics the engine records on its own, named after their k6 counterparts.

use std::time::Duration;

use stampede_metrics::{MetricHandle, MetricKind, Registry};

pub const ITERATIONS: &str = "iterations";
/// Milliseconds.
pub const ITERATION_DURATION: &str = "iteration_duration";
/// Hit = failed iteration.
pub const ITERATIONS_FAILED: &str = "iterations_failed";
pub const DROPPED_ITERATIONS: &str = "dropped_iterations";
/// Iterations force-cancelled by a ramp-down or stop deadline.
pub const INTERRUPTED_ITERATIONS: &str = "interrupted_iterations";
pub const VUS: &str = "vus";
pub const VUS_MAX: &str = "vus_max";
/// Hit = passed check.
pub const CHECKS: &str = "checks";
/// Tag carrying the check name on `checks` samples.
pub const CHECK_TAG: &str = "check";
pub const HTTP_REQS: &str = "http_reqs";
/// Milliseconds.
pub const HTTP_REQ_DURATION: &str = "http_req_duration";
/// Hit = failed request (transport error or status >= 400).
pub const HTTP_REQ_FAILED: &str = "http_req_failed";
pub const DATA_SENT: &str = "data_sent";
pub const DATA_RECEIVED: &str = "data_received";

pub const BUILTIN_KINDS: &[(&str, MetricKind)] = &[
    (ITERATIONS, MetricKind::Counter),
    (ITERATION_DURATION, MetricKind::Trend),
    (ITERATIONS_FAILED, MetricKind::Rate),
    (DROPPED_ITERATIONS, MetricKind::Counter),
    (INTERRUPTED_ITERATIONS, MetricKind::Counter),
    (VUS, MetricKind::Gauge),
    (VUS_MAX, MetricKind::Gauge),
    (CHECKS, MetricKind::Rate),
    (HTTP_REQS, MetricKind::Counter),
    (HTTP_REQ_DURATION, MetricKind::Trend),
    (HTTP_REQ_FAILED, MetricKind::Rate),
    (DATA_SENT, MetricKind::Counter),
    (DATA_RECEIVED, MetricKind::Counter),
];

pub fn builtin_kind(name: &str) -> Option<MetricKind> {
    BUILTIN_KINDS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, kind)| *kind)
}

/// Declare every built-in metric so kinds are fixed before user samples arrive.
pub fn register_builtins(registry: &Registry) -> stampede_metrics::Result<()> {
    for (name, kind) in BUILTIN_KINDS {
        registry.register(name, *kind)?;
    }
    Ok(())
}

pub(crate) fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Pre-resolved handles for the per-iteration hot path.
#[derive(Debug, Clone)]
pub(crate) struct IterationMetrics {
    iterations: MetricHandle,
    iteration_duration: MetricHandle,
    iterations_failed: MetricHandle,
    dropped: MetricHandle,
    interrupted: MetricHandle,
    vus: MetricHandle,
    vus_max: MetricHandle,
}

impl IterationMetrics {
    pub(crate) fn register(
        registry: &Registry,
        tags: &[(&str, &str)],
    ) -> stampede_metrics::Result<Self> {
        Ok(Self {
            iterations: registry.series(ITERATIONS, MetricKind::Counter, tags)?,
            iteration_duration: registry.series(ITERATION_DURATION, MetricKind::Trend, tags)?,
            iterations_failed: registry.series(ITERATIONS_FAILED, MetricKind::Rate, tags)?,
            dropped: registry.series(DROPPED_ITERATIONS, MetricKind::Counter, tags)?,
            interrupted: registry.series(INTERRUPTED_ITERATIONS, MetricKind::Counter, tags)?,
            vus: registry.series(VUS, MetricKind::Gauge, tags)?,
            vus_max: registry.series(VUS_MAX, MetricKind::Gauge, tags)?,
        })
    }

    pub(crate) fn record_completed(&self, success: bool, duration: Duration) {
        self.iterations.add(1);
        self.iteration_duration.observe(millis(duration));
        self.iterations_failed.add_rate(!success);
    }

    pub(crate) fn record_interrupted(&self) {
        self.interrupted.add(1);
    }

    pub(crate) fn record_dropped(&self, n: u64) {
        if n != 0 {
            self.dropped.add(n);
        }
    }

    /// Count the calling worker in `vus` until the guard drops.
    pub(crate) fn enter_active(&self) -> ActiveVuGuard {
        self.vus.add_gauge(1);
        ActiveVuGuard {
            vus: self.vus.clone(),
        }
    }

    pub(crate) fn set_vus_max(&self, allocated: u64) {
        self.vus_max.set_max(allocated.min(i64::MAX as u64) as i64);
    }
}

pub(crate) struct ActiveVuGuard {
    vus: MetricHandle,
}

impl Drop for ActiveVuGuard {
    fn drop(&mut self) {
        self.vus.add_gauge(-1);
    }
}
