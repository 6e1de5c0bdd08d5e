use std::fmt::Write as _;

use stampede_core::builtin::{DATA_RECEIVED, DATA_SENT, HTTP_REQS};
use stampede_core::{
    AggregateView, CheckSummary, MetricValue, RunReport, ThresholdOutcome, Verdict,
};

use super::format::*;

pub(crate) fn render(report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str("summary\n");
    writeln!(
        &mut out,
        "scenario: {} ({})",
        report.scenario, report.executor
    )
    .ok();
    writeln!(
        &mut out,
        "  verdict: {} (state {}, elapsed {})",
        report.verdict,
        report.state,
        format_duration(report.elapsed)
    )
    .ok();
    if let Some(reason) = &report.abort_reason {
        writeln!(&mut out, "  aborted: {reason}").ok();
    }
    writeln!(
        &mut out,
        "  iterations: {} completed, {} interrupted, {} dropped",
        report.iterations_completed, report.iterations_interrupted, report.iterations_dropped
    )
    .ok();
    writeln!(&mut out, "  vus allocated: {}", report.vus_allocated).ok();

    let secs = report.elapsed.as_secs_f64().max(1e-9);
    let requests = counter(report, HTTP_REQS);
    let bytes = counter(report, DATA_RECEIVED).saturating_add(counter(report, DATA_SENT));
    writeln!(
        &mut out,
        "  rates: rps={} throughput={}/s",
        format_rate(requests as f64 / secs),
        format_bytes((bytes as f64 / secs).round() as u64)
    )
    .ok();

    render_metrics(&report.metrics, &mut out);
    render_checks(&report.checks, &mut out);
    render_thresholds(report, &mut out);

    out
}

fn counter(report: &RunReport, name: &str) -> u64 {
    match report.metric(name).map(|m| &m.value) {
        Some(MetricValue::Counter(c)) => *c,
        _ => 0,
    }
}

fn render_metrics(metrics: &[AggregateView], out: &mut String) {
    if metrics.is_empty() {
        return;
    }

    out.push_str("\nmetrics\n");
    let width = metrics.iter().map(|m| m.name.len()).max().unwrap_or(0);

    for m in metrics {
        let value = match &m.value {
            MetricValue::Counter(c) if is_bytes(&m.name) => format_bytes(*c),
            MetricValue::Counter(c) => c.to_string(),
            MetricValue::Gauge(g) => g.to_string(),
            MetricValue::Rate { hits, total } => {
                let ratio = if *total == 0 {
                    0.0
                } else {
                    *hits as f64 / *total as f64
                };
                format!("{} ({hits}/{total})", format_percent(ratio))
            }
            MetricValue::Trend(t) => format!(
                "avg={} min={} med={} max={} p(90)={} p(95)={} (n={})",
                format_millis(t.mean),
                format_millis(t.min),
                format_millis(t.median()),
                format_millis(t.max),
                format_millis(t.percentile(90.0)),
                format_millis(t.percentile(95.0)),
                t.count
            ),
        };
        writeln!(out, "  {:<width$}  {value}", m.name).ok();
    }
}

fn is_bytes(name: &str) -> bool {
    name == DATA_SENT || name == DATA_RECEIVED
}

fn render_checks(checks: &[CheckSummary], out: &mut String) {
    if checks.is_empty() {
        return;
    }

    out.push_str("\nchecks\n");
    for c in checks {
        let mark = if c.fails == 0 { "ok  " } else { "FAIL" };
        writeln!(
            out,
            "  {mark} {}: {}/{} passed ({} failed)",
            c.name,
            c.passes,
            c.passes.saturating_add(c.fails),
            c.fails
        )
        .ok();
    }
}

fn render_thresholds(report: &RunReport, out: &mut String) {
    if report.thresholds.is_empty() {
        return;
    }

    out.push_str("\nthresholds\n");
    for t in &report.thresholds {
        let mark = match t.outcome {
            ThresholdOutcome::Pass { .. } => "ok     ",
            ThresholdOutcome::Fail { .. } => "FAIL   ",
            ThresholdOutcome::NoData => "NO DATA",
        };
        let observed = t
            .outcome
            .observed()
            .map(|v| format!(" (observed {v:.4})"))
            .unwrap_or_default();
        write!(out, "  {mark} {}: {}{observed}", t.metric, t.expression).ok();

        if let Some(first) = t.first_breach_at {
            write!(
                out,
                " breached {}x, first at {}",
                t.breach_count,
                format_duration(first)
            )
            .ok();
        }
        if t.abort_on_fail {
            out.push_str(" [abortOnFail]");
        }
        out.push('\n');
    }

    if report.verdict == Verdict::Fail {
        let failed = report.violations().count();
        writeln!(out, "  {failed} threshold(s) failed").ok();
    }
}
