use std::time::Duration;

use stampede_metrics::{AggregateView, MetricValue, Registry};

use crate::thresholds::{Aggregation, ThresholdExpr};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdOutcome {
    Pass { observed: f64 },
    Fail { observed: f64 },
    /// No sample has been recorded for the metric yet.
    NoData,
}

impl ThresholdOutcome {
    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }

    pub fn observed(&self) -> Option<f64> {
        match self {
            Self::Pass { observed } | Self::Fail { observed } => Some(*observed),
            Self::NoData => None,
        }
    }
}

/// Outcome of one expression plus its run-long breach history.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdResult {
    pub metric: String,
    pub expression: String,
    pub abort_on_fail: bool,
    pub outcome: ThresholdOutcome,
    /// Elapsed time of the first tick that saw this expression fail.
    pub first_breach_at: Option<Duration>,
    /// Number of ticks that saw this expression fail.
    pub breach_count: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct BreachHistory {
    first_at: Option<Duration>,
    count: u64,
}

/// Evaluates compiled thresholds against a registry and remembers every breach.
#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    exprs: Vec<ThresholdExpr>,
    history: Vec<BreachHistory>,
}

impl ThresholdEvaluator {
    pub fn new(exprs: Vec<ThresholdExpr>) -> Self {
        let history = vec![BreachHistory::default(); exprs.len()];
        Self { exprs, history }
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn exprs(&self) -> &[ThresholdExpr] {
        &self.exprs
    }

    /// Evaluate every expression once without touching the breach history.
    pub fn evaluate(&self, registry: &Registry, elapsed: Duration) -> Vec<ThresholdOutcome> {
        self.exprs
            .iter()
            .map(|expr| evaluate_expr(expr, view_of(registry, expr).as_ref(), elapsed))
            .collect()
    }

    /// One live tick: evaluate, fold breaches into the history, and return the first
    /// abort-marked expression that failed past its `delay_abort_eval`.
    pub fn tick(&mut self, registry: &Registry, elapsed: Duration) -> Option<ThresholdResult> {
        let outcomes = self.evaluate(registry, elapsed);
        let mut abort = None;

        for (i, outcome) in outcomes.into_iter().enumerate() {
            if !outcome.is_fail() {
                continue;
            }

            let h = &mut self.history[i];
            h.count = h.count.saturating_add(1);
            h.first_at.get_or_insert(elapsed);

            let expr = &self.exprs[i];
            if abort.is_none() && expr.abort_on_fail && elapsed >= expr.delay_abort_eval {
                abort = Some(self.result(i, outcome));
            }
        }

        abort
    }

    /// Final evaluation. Counts as a tick for the breach history.
    pub fn finish(&mut self, registry: &Registry, elapsed: Duration) -> Vec<ThresholdResult> {
        let _ = self.tick(registry, elapsed);
        self.evaluate(registry, elapsed)
            .into_iter()
            .enumerate()
            .map(|(i, outcome)| self.result(i, outcome))
            .collect()
    }

    fn result(&self, i: usize, outcome: ThresholdOutcome) -> ThresholdResult {
        let expr = &self.exprs[i];
        let h = self.history[i];
        ThresholdResult {
            metric: expr.metric.clone(),
            expression: expr.source.clone(),
            abort_on_fail: expr.abort_on_fail,
            outcome,
            first_breach_at: h.first_at,
            breach_count: h.count,
        }
    }
}

/// Merged view over the series the expression's tag filter selects.
fn view_of(registry: &Registry, expr: &ThresholdExpr) -> Option<AggregateView> {
    let query = registry.query(&expr.name)?;
    expr.tags
        .iter()
        .fold(query, |q, (k, v)| q.where_eq(k, v))
        .aggregate()
}

pub fn evaluate_expr(
    expr: &ThresholdExpr,
    view: Option<&AggregateView>,
    elapsed: Duration,
) -> ThresholdOutcome {
    let Some(observed) = view.and_then(|v| observed_value(v, expr.condition.aggregation, elapsed))
    else {
        return ThresholdOutcome::NoData;
    };

    let c = &expr.condition;
    if c.comparator.compare(observed, c.bound) {
        ThresholdOutcome::Pass { observed }
    } else {
        ThresholdOutcome::Fail { observed }
    }
}

fn observed_value(view: &AggregateView, agg: Aggregation, elapsed: Duration) -> Option<f64> {
    match (&view.value, agg) {
        (MetricValue::Trend(t), Aggregation::Avg) => Some(t.mean),
        (MetricValue::Trend(t), Aggregation::Min) => Some(t.min),
        (MetricValue::Trend(t), Aggregation::Max) => Some(t.max),
        (MetricValue::Trend(t), Aggregation::Med) => Some(t.median()),
        (MetricValue::Trend(t), Aggregation::Count) => Some(t.count as f64),
        (MetricValue::Trend(t), Aggregation::P(p)) => Some(t.percentile(p)),

        (MetricValue::Counter(c), Aggregation::Count) => Some(*c as f64),
        // Counter rate is per second of run time.
        (MetricValue::Counter(c), Aggregation::Rate) => {
            let secs = elapsed.as_secs_f64();
            (secs > 0.0).then(|| *c as f64 / secs)
        }

        (MetricValue::Rate { .. }, Aggregation::Rate) => view.rate(),
        (MetricValue::Gauge(g), Aggregation::Value) => Some(*g as f64),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdSpec;
    use stampede_metrics::{MetricKind, MetricSample};

    fn expr(metric: &str, raw: &str) -> ThresholdExpr {
        ThresholdExpr::compile(metric, &ThresholdSpec::new(raw)).unwrap_or_else(|e| panic!("{e}"))
    }

    fn record(reg: &Registry, s: MetricSample) {
        reg.record(&s).unwrap_or_else(|e| panic!("{e}"));
    }

    #[test]
    fn unknown_metric_is_no_data() {
        let reg = Registry::default();
        let ev = ThresholdEvaluator::new(vec![expr("http_req_duration", "p(95)<500")]);
        assert_eq!(
            ev.evaluate(&reg, Duration::from_secs(1)),
            vec![ThresholdOutcome::NoData]
        );
    }

    #[test]
    fn series_created_ahead_of_samples_is_no_data() {
        let reg = Registry::default();
        let iterations = reg
            .series("iterations", MetricKind::Counter, &[("scenario", "s")])
            .unwrap_or_else(|e| panic!("{e}"));
        let _vus = reg
            .series("vus", MetricKind::Gauge, &[("scenario", "s")])
            .unwrap_or_else(|e| panic!("{e}"));
        let ev = ThresholdEvaluator::new(vec![
            expr("iterations", "count>=1"),
            expr("iterations", "rate>10"),
            expr("vus", "value<1"),
        ]);

        assert_eq!(
            ev.evaluate(&reg, Duration::from_secs(1)),
            vec![ThresholdOutcome::NoData; 3]
        );

        iterations.add(1);
        let out = ev.evaluate(&reg, Duration::from_secs(1));
        assert_eq!(out[0], ThresholdOutcome::Pass { observed: 1.0 });
        assert_eq!(out[1], ThresholdOutcome::Fail { observed: 1.0 });
        assert_eq!(out[2], ThresholdOutcome::NoData);
    }

    #[test]
    fn percentile_pass_and_fail() {
        let reg = Registry::default();
        for _ in 0..100 {
            record(&reg, MetricSample::trend("http_req_duration", 1000.0));
        }
        let ev = ThresholdEvaluator::new(vec![
            expr("http_req_duration", "p(95)<500"),
            expr("http_req_duration", "p(95)<2000"),
        ]);
        let out = ev.evaluate(&reg, Duration::from_secs(1));
        assert!(out[0].is_fail());
        assert!(matches!(out[1], ThresholdOutcome::Pass { .. }));
        let observed = out[0].observed().unwrap_or_default();
        assert!((observed - 1000.0).abs() <= 1.0, "observed={observed}");
    }

    #[test]
    fn counter_rate_is_per_second_of_elapsed_time() {
        let reg = Registry::default();
        record(&reg, MetricSample::counter("http_reqs", 500));
        let ev = ThresholdEvaluator::new(vec![expr("http_reqs", "rate>100")]);

        let out = ev.evaluate(&reg, Duration::from_secs(4));
        assert_eq!(out, vec![ThresholdOutcome::Pass { observed: 125.0 }]);

        let out = ev.evaluate(&reg, Duration::from_secs(10));
        assert_eq!(out, vec![ThresholdOutcome::Fail { observed: 50.0 }]);

        assert_eq!(
            ev.evaluate(&reg, Duration::ZERO),
            vec![ThresholdOutcome::NoData]
        );
    }

    #[test]
    fn rate_metric_uses_hit_ratio() {
        let reg = Registry::default();
        for i in 0..20 {
            record(&reg, MetricSample::rate("checks", i != 0));
        }
        let ev = ThresholdEvaluator::new(vec![expr("checks", "rate>=0.95")]);
        assert_eq!(
            ev.evaluate(&reg, Duration::from_secs(1)),
            vec![ThresholdOutcome::Pass { observed: 0.95 }]
        );
    }

    #[test]
    fn tagged_threshold_sees_only_matching_series() {
        let reg = Registry::default();
        let login = MetricSample::trend("http_req_duration", 900.0);
        let search = MetricSample::trend("http_req_duration", 50.0);
        for _ in 0..10 {
            reg.record_tagged(&login, &[("name", "login")])
                .unwrap_or_else(|e| panic!("{e}"));
            reg.record_tagged(&search, &[("name", "search")])
                .unwrap_or_else(|e| panic!("{e}"));
        }

        let ev = ThresholdEvaluator::new(vec![
            expr("http_req_duration{name:search}", "max<100"),
            expr("http_req_duration{name:login}", "max<100"),
            expr("http_req_duration{name:logout}", "max<100"),
            expr("http_req_duration", "count==20"),
        ]);
        let out = ev.evaluate(&reg, Duration::from_secs(1));

        assert!(matches!(out[0], ThresholdOutcome::Pass { .. }), "{:?}", out[0]);
        assert!(out[1].is_fail(), "{:?}", out[1]);
        assert_eq!(out[2], ThresholdOutcome::NoData);
        assert_eq!(out[3], ThresholdOutcome::Pass { observed: 20.0 });
    }

    #[test]
    fn gauge_value() {
        let reg = Registry::default();
        record(&reg, MetricSample::gauge("vus", 7));
        let ev = ThresholdEvaluator::new(vec![expr("vus", "value<=5")]);
        assert!(ev.evaluate(&reg, Duration::from_secs(1))[0].is_fail());
    }

    #[test]
    fn tick_accumulates_history_and_respects_abort_delay() {
        let reg = Registry::default();
        record(&reg, MetricSample::trend("http_req_duration", 900.0));

        let spec = ThresholdSpec::new("max<500")
            .abort_on_fail()
            .delay_abort_eval(Duration::from_secs(10));
        let abort_expr = ThresholdExpr::compile("http_req_duration", &spec)
            .unwrap_or_else(|e| panic!("{e}"));
        let mut ev = ThresholdEvaluator::new(vec![
            expr("http_req_duration", "avg<100"),
            abort_expr,
        ]);

        assert!(ev.tick(&reg, Duration::from_secs(1)).is_none());
        assert!(ev.tick(&reg, Duration::from_secs(5)).is_none());
        let abort = ev
            .tick(&reg, Duration::from_secs(10))
            .unwrap_or_else(|| panic!("expected abort"));
        assert_eq!(abort.expression, "max<500");
        assert_eq!(abort.breach_count, 3);
        assert_eq!(abort.first_breach_at, Some(Duration::from_secs(1)));

        let results = ev.finish(&reg, Duration::from_secs(12));
        assert_eq!(results[0].breach_count, 4);
        assert!(results[0].outcome.is_fail());
        assert!(!results[0].abort_on_fail);
    }

    #[test]
    fn recovered_threshold_keeps_history_but_final_outcome_passes() {
        let reg = Registry::default();
        record(&reg, MetricSample::rate("http_req_failed", true));
        let mut ev = ThresholdEvaluator::new(vec![expr("http_req_failed", "rate<0.5")]);
        assert!(ev.tick(&reg, Duration::from_secs(1)).is_none());

        for _ in 0..9 {
            record(&reg, MetricSample::rate("http_req_failed", false));
        }
        let results = ev.finish(&reg, Duration::from_secs(2));
        assert!(matches!(results[0].outcome, ThresholdOutcome::Pass { .. }));
        assert_eq!(results[0].breach_count, 1);
        assert_eq!(results[0].first_breach_at, Some(Duration::from_secs(1)));
    }

    #[test]
    fn kind_mismatch_at_runtime_is_no_data() {
        let reg = Registry::default();
        record(&reg, MetricSample::counter("custom", 3));
        let ev = ThresholdEvaluator::new(vec![expr("custom", "p(95)<1")]);
        assert_eq!(
            ev.evaluate(&reg, Duration::from_secs(1)),
            vec![ThresholdOutcome::NoData]
        );
    }
}
