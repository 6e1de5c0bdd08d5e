use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use stampede_core::builtin::{
    DROPPED_ITERATIONS, INTERRUPTED_ITERATIONS, ITERATION_DURATION, ITERATIONS, ITERATIONS_FAILED,
    VUS,
};
use stampede_core::{
    AbortReason, ConfigError, Error, IterationContext, IterationOutcome, MetricValue,
    ProgressUpdate, RunController, RunOptions, RunState, ScenarioSpec, Stage, ThresholdOutcome,
    ThresholdSet, ThresholdSpec, Verdict, run_scenario,
};

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

async fn sleep_then_finish(ctx: IterationContext, d: Duration) -> IterationOutcome {
    ctx.sleep(d).await;
    ctx.finish(true)
}

#[tokio::test(start_paused = true)]
async fn three_stage_ramp_passes_and_respects_stage_targets() {
    let spec = ScenarioSpec::ramping_vus(
        "ramp",
        0,
        vec![
            Stage::new(secs(10), 5),
            Stage::new(secs(10), 5),
            Stage::new(secs(10), 0),
        ],
    )
    .with_threshold(ThresholdSet::new(ITERATION_DURATION, ["p(95)<500"]));

    let max_vu = Arc::new(AtomicU64::new(0));
    let seen = max_vu.clone();
    let report = run_scenario(spec, RunOptions::default(), move |ctx: IterationContext| {
        seen.fetch_max(ctx.vu_id, Ordering::Relaxed);
        sleep_then_finish(ctx, ms(100))
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.state, RunState::Completed);
    assert!(report.abort_reason.is_none());
    assert!(
        report.elapsed >= secs(30) && report.elapsed < ms(30_500),
        "elapsed={:?}",
        report.elapsed
    );
    assert_eq!(max_vu.load(Ordering::Relaxed), 5);

    assert_eq!(
        report.iterations_started,
        report.iterations_completed + report.iterations_interrupted
    );
    assert!(
        (700..=1_100).contains(&report.iterations_completed),
        "completed={}",
        report.iterations_completed
    );
    assert_eq!(
        report.metric(ITERATIONS).map(|m| m.count()),
        Some(report.iterations_completed)
    );
    assert!(matches!(
        report.thresholds[0].outcome,
        ThresholdOutcome::Pass { .. }
    ));
    // Every worker is parked or gone by the end.
    assert_eq!(
        report.metric(VUS).map(|m| m.value.clone()),
        Some(MetricValue::Gauge(0))
    );
    assert_eq!(report.vus_allocated, 5);
}

#[tokio::test(start_paused = true)]
async fn slow_iterations_fail_percentile_threshold() {
    let spec = ScenarioSpec::ramping_vus("slow", 2, vec![Stage::new(secs(3), 2)])
        .with_threshold(ThresholdSet::new(ITERATION_DURATION, ["p(95)<500"]));

    let report = run_scenario(spec, RunOptions::default(), |ctx: IterationContext| {
        sleep_then_finish(ctx, ms(1_000))
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(report.state, RunState::Completed);
    let t = &report.thresholds[0];
    assert!(t.outcome.is_fail());
    assert!(t.breach_count >= 1);
    assert_eq!(report.violations().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn abort_on_fail_threshold_stops_run_early() {
    let spec = ScenarioSpec::ramping_vus("abort", 2, vec![Stage::new(secs(10), 2)])
        .with_threshold(ThresholdSet::new(
            ITERATION_DURATION,
            [ThresholdSpec::new("p(95)<500").abort_on_fail()],
        ));

    let ctl = RunController::new(spec, RunOptions::default()).unwrap_or_else(|e| panic!("{e}"));
    let state_rx = ctl.state_rx();
    let report = ctl
        .run(|ctx: IterationContext| sleep_then_finish(ctx, ms(1_000)))
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(report.verdict, Verdict::Aborted);
    assert_eq!(report.state, RunState::Aborted);
    assert_eq!(*state_rx.borrow(), RunState::Aborted);
    assert!(report.elapsed < secs(5), "elapsed={:?}", report.elapsed);
    match &report.abort_reason {
        Some(AbortReason::Threshold {
            metric, expression, ..
        }) => {
            assert_eq!(metric, ITERATION_DURATION);
            assert_eq!(expression, "p(95)<500");
        }
        other => panic!("unexpected abort reason: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn delayed_abort_waits_for_delay() {
    let spec = ScenarioSpec::ramping_vus("delayed", 1, vec![Stage::new(secs(20), 1)])
        .with_threshold(ThresholdSet::new(
            ITERATION_DURATION,
            [ThresholdSpec::new("max<500")
                .abort_on_fail()
                .delay_abort_eval(secs(6))],
        ));

    let report = run_scenario(spec, RunOptions::default(), |ctx: IterationContext| {
        sleep_then_finish(ctx, ms(1_000))
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(report.verdict, Verdict::Aborted);
    assert!(
        report.elapsed >= secs(6) && report.elapsed < secs(8),
        "elapsed={:?}",
        report.elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn external_cancel_aborts() {
    let spec = ScenarioSpec::ramping_vus("cancel", 1, vec![Stage::new(secs(60), 1)]);
    let ctl = RunController::new(spec, RunOptions::default()).unwrap_or_else(|e| panic!("{e}"));
    let handle = ctl.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(secs(2)).await;
        handle.cancel();
    });

    let report = ctl
        .run(|ctx: IterationContext| sleep_then_finish(ctx, ms(100)))
        .await
        .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(report.verdict, Verdict::Aborted);
    assert_eq!(report.abort_reason, Some(AbortReason::Cancelled));
    assert!(report.elapsed < secs(3), "elapsed={:?}", report.elapsed);
}

#[tokio::test(start_paused = true)]
async fn excess_vus_are_interrupted_after_graceful_ramp_down() {
    let mut spec = ScenarioSpec::ramping_vus(
        "ramp-down",
        2,
        vec![Stage::new(secs(2), 2), Stage::new(secs(1), 0)],
    );
    spec.graceful_ramp_down = Some(ms(500));
    let opts = RunOptions {
        ramp_tick: ms(100),
        ..RunOptions::default()
    };

    let report = run_scenario(spec, opts, |ctx: IterationContext| {
        sleep_then_finish(ctx, secs(10))
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(report.iterations_started, 2);
    assert_eq!(report.iterations_completed, 0);
    assert_eq!(report.iterations_interrupted, 2);
    assert!(report.elapsed < secs(4), "elapsed={:?}", report.elapsed);
    assert_eq!(report.verdict, Verdict::Pass);
}

#[tokio::test(start_paused = true)]
async fn graceful_stop_interrupts_long_iterations() {
    let spec = ScenarioSpec::ramping_vus("stop", 1, vec![Stage::new(secs(1), 1)])
        .with_graceful_stop(secs(2));

    let report = run_scenario(spec, RunOptions::default(), |ctx: IterationContext| {
        sleep_then_finish(ctx, secs(60))
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.iterations_interrupted, 1);
    assert_eq!(report.iterations_started, 1);
    assert!(
        report.elapsed >= secs(3) && report.elapsed < ms(3_100),
        "elapsed={:?}",
        report.elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn panicking_iteration_counts_as_failed() {
    let spec = ScenarioSpec::ramping_vus("panic", 1, vec![Stage::new(secs(1), 1)])
        .with_threshold(ThresholdSet::new(ITERATIONS_FAILED, ["rate<0.5"]));

    let report = run_scenario(spec, RunOptions::default(), |ctx: IterationContext| async move {
        ctx.sleep(ms(100)).await;
        if ctx.iteration % 2 == 0 {
            panic!("boom");
        }
        IterationOutcome::new(false, ctx.elapsed())
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    assert!(report.iterations_completed >= 9);
    assert_eq!(report.iterations_interrupted, 0);
    assert_eq!(
        report.metric(ITERATIONS_FAILED).and_then(|m| m.rate()),
        Some(1.0)
    );
    assert_eq!(report.verdict, Verdict::Fail);
}

#[tokio::test(start_paused = true)]
async fn invalid_config_starts_nothing() {
    let spec = ScenarioSpec::ramping_arrival_rate("bad", 10, 100, 50, vec![Stage::new(secs(5), 10)]);
    let calls = Arc::new(AtomicU64::new(0));
    let seen = calls.clone();

    let res = run_scenario(spec, RunOptions::default(), move |ctx: IterationContext| {
        seen.fetch_add(1, Ordering::Relaxed);
        sleep_then_finish(ctx, ms(10))
    })
    .await;

    assert!(matches!(
        res,
        Err(Error::Config(ConfigError::InvalidMaxVus {
            pre_allocated_vus: 100,
            max_vus: 50
        }))
    ));
    assert_eq!(calls.load(Ordering::Relaxed), 0);
}

#[tokio::test(start_paused = true)]
async fn progress_callback_ticks_during_run() {
    let spec = ScenarioSpec::ramping_vus("progress", 0, vec![Stage::new(secs(4), 4)]);
    let updates: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::default();
    let sink = updates.clone();

    let report = RunController::new(spec, RunOptions::default())
        .unwrap_or_else(|e| panic!("{e}"))
        .with_progress(Arc::new(move |u: ProgressUpdate| {
            sink.lock().unwrap_or_else(|e| panic!("{e}")).push(u);
        }))
        .run(|ctx: IterationContext| sleep_then_finish(ctx, ms(100)))
        .await
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(report.verdict, Verdict::Pass);

    let updates = updates.lock().unwrap_or_else(|e| panic!("{e}"));
    assert!(updates.len() >= 3, "updates={}", updates.len());
    assert_eq!(updates[0].tick, 1);
    assert_eq!(updates[0].target, 1);
    assert_eq!(updates[2].target, 3);
    assert!(updates.windows(2).all(|w| w[0].iterations <= w[1].iterations));
}

#[tokio::test(start_paused = true)]
async fn custom_samples_and_checks_land_in_report() {
    let spec = ScenarioSpec::ramping_vus("custom", 1, vec![Stage::new(secs(1), 1)])
        .with_threshold(ThresholdSet::new("checks", ["rate>0.9"]))
        .with_threshold(ThresholdSet::new("response_time", ["avg<300"]));

    let report = run_scenario(spec, RunOptions::default(), |ctx: IterationContext| async move {
        ctx.sleep(ms(200)).await;
        ctx.check("always ok", true);
        ctx.finish(true)
            .with_sample(stampede_core::MetricSample::trend("response_time", 250.0))
    })
    .await
    .unwrap_or_else(|e| panic!("{e}"));

    assert_eq!(report.verdict, Verdict::Pass);
    assert_eq!(report.metric("checks").and_then(|m| m.rate()), Some(1.0));
    let custom = report
        .metric("response_time")
        .and_then(|m| m.trend().map(|t| t.mean));
    assert!(custom.is_some_and(|m| (m - 250.0).abs() < 1.0));
    assert!(
        report
            .series
            .iter()
            .filter(|s| s.name == "checks")
            .all(|s| s.tags.contains(&("check".to_string(), "always ok".to_string())))
    );
}

#[tokio::test(start_paused = true)]
async fn counter_thresholds_wait_for_first_sample() -> anyhow::Result<()> {
    let spec = ScenarioSpec::ramping_vus("slow-first", 1, vec![Stage::new(secs(4), 1)])
        .with_threshold(ThresholdSet::new(
            ITERATIONS,
            [ThresholdSpec::new("count>=1").abort_on_fail()],
        ))
        .with_threshold(ThresholdSet::new(INTERRUPTED_ITERATIONS, ["count<1"]))
        .with_threshold(ThresholdSet::new(DROPPED_ITERATIONS, ["count==0"]));

    let report = run_scenario(spec, RunOptions::default(), |ctx: IterationContext| {
        sleep_then_finish(ctx, secs(3))
    })
    .await?;

    anyhow::ensure!(
        report.verdict == Verdict::Pass,
        "verdict={:?} abort={:?}",
        report.verdict,
        report.abort_reason
    );
    anyhow::ensure!(report.elapsed >= secs(4), "elapsed={:?}", report.elapsed);

    let iterations = &report.thresholds[0];
    anyhow::ensure!(
        matches!(iterations.outcome, ThresholdOutcome::Pass { .. }),
        "iterations outcome={:?}",
        iterations.outcome
    );
    anyhow::ensure!(iterations.breach_count == 0);
    anyhow::ensure!(iterations.first_breach_at.is_none());

    for never_recorded in &report.thresholds[1..] {
        anyhow::ensure!(
            never_recorded.outcome == ThresholdOutcome::NoData,
            "{} {}: {:?}",
            never_recorded.metric,
            never_recorded.expression,
            never_recorded.outcome
        );
    }
    anyhow::ensure!(report.metric(INTERRUPTED_ITERATIONS).is_none());
    anyhow::ensure!(report.no_data().count() == 2);
    Ok(())
}
