use std::collections::BTreeSet;
use std::time::Duration;

use stampede_metrics::{AggregateView, MetricSeriesSummary, MetricValue, Registry};

use crate::builtin::{CHECK_TAG, CHECKS};

use crate::config::ExecutorKind;
use crate::controller::RunState;
use crate::thresholds_eval::{ThresholdOutcome, ThresholdResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Verdict {
    Pass,
    /// Ran to completion with at least one threshold failing.
    Fail,
    Aborted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    Threshold {
        metric: String,
        expression: String,
        observed: Option<f64>,
    },
    Cancelled,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Threshold {
                metric,
                expression,
                observed: Some(v),
            } => write!(f, "threshold `{metric}: {expression}` failed (observed {v})"),
            Self::Threshold {
                metric, expression, ..
            } => write!(f, "threshold `{metric}: {expression}` failed"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Pass/fail tally of one named check across every series that recorded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub scenario: String,
    pub executor: ExecutorKind,
    pub verdict: Verdict,
    pub state: RunState,
    pub abort_reason: Option<AbortReason>,
    pub elapsed: Duration,

    /// One merged view per metric, sorted by name.
    pub metrics: Vec<AggregateView>,
    /// Every tagged series.
    pub series: Vec<MetricSeriesSummary>,
    /// Sorted by check name.
    pub checks: Vec<CheckSummary>,
    pub thresholds: Vec<ThresholdResult>,

    pub iterations_started: u64,
    pub iterations_completed: u64,
    pub iterations_interrupted: u64,
    pub iterations_dropped: u64,
    pub vus_allocated: u64,
}

impl RunReport {
    pub fn metric(&self, name: &str) -> Option<&AggregateView> {
        self.metrics.iter().find(|m| m.name == name)
    }

    /// Thresholds whose final evaluation failed.
    pub fn violations(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds.iter().filter(|t| t.outcome.is_fail())
    }

    /// Thresholds that never saw a sample.
    pub fn no_data(&self) -> impl Iterator<Item = &ThresholdResult> {
        self.thresholds
            .iter()
            .filter(|t| t.outcome == ThresholdOutcome::NoData)
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// Tally every check named in `series`, merging its per-scenario series.
pub(crate) fn summarize_checks(
    registry: &Registry,
    series: &[MetricSeriesSummary],
) -> Vec<CheckSummary> {
    let names: BTreeSet<&str> = series
        .iter()
        .filter(|s| s.name == CHECKS)
        .filter_map(|s| s.tags.iter().find(|(k, _)| k == CHECK_TAG))
        .map(|(_, v)| v.as_str())
        .collect();

    names
        .into_iter()
        .filter_map(|name| {
            let view = registry.query(CHECKS)?.where_eq(CHECK_TAG, name).aggregate()?;
            let MetricValue::Rate { hits, total } = view.value else {
                return None;
            };
            Some(CheckSummary {
                name: name.to_string(),
                passes: hits,
                fails: total.saturating_sub(hits),
            })
        })
        .collect()
}

pub(crate) fn verdict_for(aborted: bool, thresholds: &[ThresholdResult]) -> Verdict {
    if aborted {
        Verdict::Aborted
    } else if thresholds.iter().any(|t| t.outcome.is_fail()) {
        Verdict::Fail
    } else {
        Verdict::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcome: ThresholdOutcome) -> ThresholdResult {
        ThresholdResult {
            metric: "http_req_duration".to_string(),
            expression: "p(95)<500".to_string(),
            abort_on_fail: false,
            outcome,
            first_breach_at: None,
            breach_count: 0,
        }
    }

    #[test]
    fn checks_merge_across_scenarios_by_name() {
        let reg = Registry::default();
        crate::builtin::register_builtins(&reg).unwrap_or_else(|e| panic!("{e}"));
        let record = |ok: bool, scenario: &str, check: &str| {
            reg.record_tagged(
                &stampede_metrics::MetricSample::rate(CHECKS, ok),
                &[("scenario", scenario), (CHECK_TAG, check)],
            )
            .unwrap_or_else(|e| panic!("{e}"));
        };
        for ok in [true, true, false] {
            record(ok, "login", "login status is 200");
        }
        record(true, "smoke", "login status is 200");
        record(false, "login", "logout status is 204");

        let series = reg.summarize();
        let checks = summarize_checks(&reg, &series);
        assert_eq!(
            checks,
            vec![
                CheckSummary {
                    name: "login status is 200".to_string(),
                    passes: 3,
                    fails: 1,
                },
                CheckSummary {
                    name: "logout status is 204".to_string(),
                    passes: 0,
                    fails: 1,
                },
            ]
        );
    }

    #[test]
    fn no_checks_recorded_means_no_summaries() {
        let reg = Registry::default();
        crate::builtin::register_builtins(&reg).unwrap_or_else(|e| panic!("{e}"));
        assert!(summarize_checks(&reg, &reg.summarize()).is_empty());
    }

    #[test]
    fn no_data_does_not_fail_the_run() {
        assert_eq!(
            verdict_for(false, &[result(ThresholdOutcome::NoData)]),
            Verdict::Pass
        );
        assert_eq!(
            verdict_for(false, &[result(ThresholdOutcome::Fail { observed: 900.0 })]),
            Verdict::Fail
        );
        assert_eq!(
            verdict_for(true, &[result(ThresholdOutcome::Pass { observed: 1.0 })]),
            Verdict::Aborted
        );
    }

    #[test]
    fn verdict_strings_are_lowercase() {
        assert_eq!(Verdict::Aborted.to_string(), "aborted");
        assert_eq!("fail".parse::<Verdict>().ok(), Some(Verdict::Fail));
    }

    #[test]
    fn abort_reason_mentions_expression() {
        let r = AbortReason::Threshold {
            metric: "http_req_duration".to_string(),
            expression: "p(95)<500".to_string(),
            observed: Some(1000.0),
        };
        assert_eq!(
            r.to_string(),
            "threshold `http_req_duration: p(95)<500` failed (observed 1000)"
        );
    }
}
