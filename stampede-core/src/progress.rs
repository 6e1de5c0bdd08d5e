use std::sync::Arc;
use std::time::Duration;

use stampede_metrics::{MetricValue, Registry};

use crate::builtin::{DROPPED_ITERATIONS, INTERRUPTED_ITERATIONS, ITERATIONS, VUS, VUS_MAX};
use crate::config::ExecutorKind;
use crate::schedule::{RampSchedule, StageSnapshot};

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// 1-based tick counter.
    pub tick: u64,
    pub elapsed: Duration,
    pub scenario: String,
    pub executor: ExecutorKind,
    pub stage: Option<StageSnapshot>,
    /// VU target, or starts per `time_unit` for arrival-rate scenarios.
    pub target: u64,
    pub active_vus: u64,
    pub allocated_vus: u64,
    pub iterations: u64,
    pub dropped: u64,
    pub interrupted: u64,
}

pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync + 'static>;

fn gauge(registry: &Registry, name: &str) -> u64 {
    match registry.snapshot(name).map(|v| v.value) {
        Some(MetricValue::Gauge(g)) => g.max(0) as u64,
        _ => 0,
    }
}

pub(crate) fn build_update(
    tick: u64,
    elapsed: Duration,
    scenario: &str,
    executor: ExecutorKind,
    schedule: &RampSchedule,
    registry: &Registry,
) -> ProgressUpdate {
    let stage = schedule.stage_snapshot_at(elapsed);
    ProgressUpdate {
        tick,
        elapsed,
        scenario: scenario.to_string(),
        executor,
        target: stage
            .as_ref()
            .map_or_else(|| schedule.target_at(elapsed), |s| s.current_target),
        stage,
        active_vus: gauge(registry, VUS),
        allocated_vus: gauge(registry, VUS_MAX),
        iterations: registry.counter_total(ITERATIONS),
        dropped: registry.counter_total(DROPPED_ITERATIONS),
        interrupted: registry.counter_total(INTERRUPTED_ITERATIONS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::register_builtins;
    use crate::config::Stage;
    use stampede_metrics::MetricSample;

    #[test]
    fn update_reads_live_counters_and_stage() {
        let reg = Registry::default();
        register_builtins(&reg).unwrap_or_else(|e| panic!("{e}"));
        for s in [
            MetricSample::counter(ITERATIONS, 42),
            MetricSample::counter(DROPPED_ITERATIONS, 3),
            MetricSample::gauge(VUS, 4),
            MetricSample::gauge(VUS_MAX, 6),
        ] {
            reg.record(&s).unwrap_or_else(|e| panic!("{e}"));
        }

        let schedule = RampSchedule::new(
            0,
            vec![
                Stage::new(Duration::from_secs(10), 10),
                Stage::new(Duration::from_secs(10), 0),
            ],
        );
        let u = build_update(
            3,
            Duration::from_secs(5),
            "smoke",
            ExecutorKind::RampingVus,
            &schedule,
            &reg,
        );

        assert_eq!(u.target, 5);
        assert_eq!(u.stage.map(|s| s.index), Some(0));
        assert_eq!((u.active_vus, u.allocated_vus), (4, 6));
        assert_eq!((u.iterations, u.dropped, u.interrupted), (42, 3, 0));
    }
}
