use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use stampede_core::{
    MetricValue, ProgressFn, ProgressUpdate, RunReport, ScenarioSpec, ThresholdOutcome,
};

use super::Reporter;

pub(crate) struct JsonOutput;

impl Reporter for JsonOutput {
    fn header(&self, _scenario_path: &Path, _spec: &ScenarioSpec) {}

    fn progress_sink(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u: ProgressUpdate| {
            emit_json_line(&build_progress_line(&u));
        }))
    }

    fn summary(&self, report: &RunReport) -> anyhow::Result<()> {
        emit_json_line(&build_summary_line(report));
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub tick: u64,
    pub elapsed_secs: f64,
    pub scenario: String,
    pub executor: String,
    /// 1-based; absent once every stage has elapsed.
    pub stage: Option<usize>,
    pub stages: Option<usize>,
    pub target: u64,
    pub active_vus: u64,
    pub allocated_vus: u64,
    pub iterations: u64,
    pub dropped_iterations: u64,
    pub interrupted_iterations: u64,
}

fn build_progress_line(u: &ProgressUpdate) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        tick: u.tick,
        elapsed_secs: u.elapsed.as_secs_f64(),
        scenario: u.scenario.clone(),
        executor: u.executor.to_string(),
        stage: u.stage.as_ref().map(|s| s.index + 1),
        stages: u.stage.as_ref().map(|s| s.count),
        target: u.target,
        active_vus: u.active_vus,
        allocated_vus: u.allocated_vus,
        iterations: u.iterations,
        dropped_iterations: u.dropped,
        interrupted_iterations: u.interrupted,
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine {
    pub kind: &'static str,
    pub scenario: String,
    pub executor: String,
    pub verdict: String,
    pub state: String,
    pub abort_reason: Option<String>,
    pub elapsed_secs: f64,
    pub iterations: JsonIterations,
    pub vus_allocated: u64,
    pub metrics: BTreeMap<String, JsonMetric>,
    pub checks: Vec<JsonCheck>,
    pub thresholds: Vec<JsonThreshold>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonCheck {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonIterations {
    pub started: u64,
    pub completed: u64,
    pub interrupted: u64,
    pub dropped: u64,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum JsonMetric {
    Counter {
        value: u64,
    },
    Gauge {
        value: i64,
    },
    Rate {
        rate: f64,
        hits: u64,
        total: u64,
    },
    Trend {
        count: u64,
        avg: f64,
        min: f64,
        med: f64,
        max: f64,
        p90: f64,
        p95: f64,
        p99: f64,
    },
}

impl From<&MetricValue> for JsonMetric {
    fn from(value: &MetricValue) -> Self {
        match value {
            MetricValue::Counter(c) => Self::Counter { value: *c },
            MetricValue::Gauge(g) => Self::Gauge { value: *g },
            MetricValue::Rate { hits, total } => Self::Rate {
                rate: if *total == 0 {
                    0.0
                } else {
                    *hits as f64 / *total as f64
                },
                hits: *hits,
                total: *total,
            },
            MetricValue::Trend(t) => Self::Trend {
                count: t.count,
                avg: t.mean,
                min: t.min,
                med: t.median(),
                max: t.max,
                p90: t.percentile(90.0),
                p95: t.percentile(95.0),
                p99: t.percentile(99.0),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonThreshold {
    pub metric: String,
    pub expression: String,
    /// `pass`, `fail` or `no_data`.
    pub status: &'static str,
    pub observed: Option<f64>,
    pub abort_on_fail: bool,
    pub breach_count: u64,
    pub first_breach_secs: Option<f64>,
}

fn build_summary_line(report: &RunReport) -> JsonSummaryLine {
    let metrics = report
        .metrics
        .iter()
        .map(|m| (m.name.clone(), JsonMetric::from(&m.value)))
        .collect();

    let thresholds = report
        .thresholds
        .iter()
        .map(|t| JsonThreshold {
            metric: t.metric.clone(),
            expression: t.expression.clone(),
            status: match t.outcome {
                ThresholdOutcome::Pass { .. } => "pass",
                ThresholdOutcome::Fail { .. } => "fail",
                ThresholdOutcome::NoData => "no_data",
            },
            observed: t.outcome.observed(),
            abort_on_fail: t.abort_on_fail,
            breach_count: t.breach_count,
            first_breach_secs: t.first_breach_at.map(|d| d.as_secs_f64()),
        })
        .collect();

    JsonSummaryLine {
        kind: "summary",
        scenario: report.scenario.clone(),
        executor: report.executor.to_string(),
        verdict: report.verdict.to_string(),
        state: report.state.to_string(),
        abort_reason: report.abort_reason.as_ref().map(ToString::to_string),
        elapsed_secs: report.elapsed.as_secs_f64(),
        iterations: JsonIterations {
            started: report.iterations_started,
            completed: report.iterations_completed,
            interrupted: report.iterations_interrupted,
            dropped: report.iterations_dropped,
        },
        vus_allocated: report.vus_allocated,
        metrics,
        checks: report
            .checks
            .iter()
            .map(|c| JsonCheck {
                name: c.name.clone(),
                passes: c.passes,
                fails: c.fails,
            })
            .collect(),
        thresholds,
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}
