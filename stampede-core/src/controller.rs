use std::pin::pin;
use std::sync::Arc;

use stampede_http::HttpClient;
use stampede_metrics::Registry;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::builtin::{IterationMetrics, register_builtins};
use crate::config::{ExecutorKind, RunOptions, ScenarioSpec};
use crate::error::Result;
use crate::executor::{Executor, ExecutorEnv, ExecutorReport, RampingArrivalRate, RampingVus};
use crate::iteration::{Iteration, IterationShared};
use crate::progress::{ProgressFn, build_update};
use crate::report::{AbortReason, RunReport, summarize_checks, verdict_for};
use crate::schedule::RampSchedule;
use crate::thresholds::compile_thresholds;
use crate::thresholds_eval::ThresholdEvaluator;

/// Lifecycle of one run. `Completed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum RunState {
    Pending,
    Running,
    RampingDown,
    Completed,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }
}

/// Requests an early, aborting stop of a run from outside the controller.
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}

/// Owns a validated scenario and drives it through one run.
pub struct RunController {
    spec: ScenarioSpec,
    options: RunOptions,
    registry: Arc<Registry>,
    evaluator: ThresholdEvaluator,
    client: Option<HttpClient>,
    progress: Option<ProgressFn>,
    cancel: CancellationToken,
    state_tx: watch::Sender<RunState>,
}

impl RunController {
    /// Validate `spec` and `options` and prepare a fresh registry. Nothing runs yet.
    pub fn new(spec: ScenarioSpec, options: RunOptions) -> Result<Self> {
        spec.validate()?;
        options.validate()?;

        let registry = Arc::new(Registry::default());
        register_builtins(&registry)?;
        let exprs = compile_thresholds(&spec.thresholds, |name| registry.kind_of(name))?;

        let (state_tx, _) = watch::channel(RunState::Pending);
        Ok(Self {
            spec,
            options,
            registry,
            evaluator: ThresholdEvaluator::new(exprs),
            client: None,
            progress: None,
            cancel: CancellationToken::new(),
            state_tx,
        })
    }

    /// Use `client` for `IterationContext::http` instead of a default one.
    #[must_use]
    pub fn with_client(mut self, client: HttpClient) -> Self {
        self.client = Some(client);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn spec(&self) -> &ScenarioSpec {
        &self.spec
    }

    /// The run's registry. Stays readable after the run ends.
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn state_rx(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    pub async fn run(self, iteration: impl Iteration) -> Result<RunReport> {
        let Self {
            spec,
            options,
            registry,
            mut evaluator,
            client,
            progress,
            cancel,
            state_tx,
        } = self;

        let set_state = |state: RunState| {
            tracing::info!(scenario = %spec.name, %state, "run state");
            state_tx.send_replace(state);
        };

        let shared = Arc::new(IterationShared {
            scenario: Arc::from(spec.name.as_str()),
            tags: spec.tags.clone(),
            env: options.env.clone(),
            registry: registry.clone(),
            client: client.unwrap_or_default(),
        });
        let metrics = IterationMetrics::register(&registry, &shared.base_tags())?;

        let schedule = match spec.executor {
            ExecutorKind::RampingVus => RampSchedule::new(spec.start_vus, spec.stages.clone()),
            ExecutorKind::RampingArrivalRate => {
                RampSchedule::new(spec.start_rate, spec.stages.clone())
            }
        };
        let total = schedule.total_duration();

        let stop = CancellationToken::new();
        let hard_stop = CancellationToken::new();
        let started = Instant::now();
        let env = Arc::new(ExecutorEnv::new(
            Arc::new(iteration),
            shared,
            metrics,
            started,
            stop.clone(),
            hard_stop.clone(),
        ));

        set_state(RunState::Running);
        tracing::info!(
            scenario = %spec.name,
            executor = %spec.executor,
            stages = spec.stages.len(),
            duration = ?total,
            thresholds = evaluator.exprs().len(),
            "starting run"
        );

        let mut exec_task: JoinHandle<ExecutorReport> = match spec.executor {
            ExecutorKind::RampingVus => tokio::spawn(
                RampingVus {
                    schedule: schedule.clone(),
                    pool: spec.peak_vus(),
                    graceful_ramp_down: spec.graceful_ramp_down(),
                    ramp_tick: options.ramp_tick,
                }
                .run(env.clone()),
            ),
            ExecutorKind::RampingArrivalRate => tokio::spawn(
                RampingArrivalRate {
                    schedule: schedule.clone(),
                    time_unit: spec.time_unit,
                    pre_allocated_vus: spec.pre_allocated_vus,
                    max_vus: spec.max_vus(),
                    pacer_tick: options.pacer_tick,
                }
                .run(env.clone()),
            ),
        };

        let mut threshold_ticker = tokio::time::interval_at(
            started + options.threshold_tick,
            options.threshold_tick,
        );
        threshold_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut progress_ticker =
            tokio::time::interval_at(started + options.progress_tick, options.progress_tick);
        progress_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stages_end = pin!(tokio::time::sleep_until(started + total));
        let mut abort_reason: Option<AbortReason> = None;
        let mut exec_report: Option<ExecutorReport> = None;
        let mut progress_tick = 0u64;

        loop {
            tokio::select! {
                _ = &mut stages_end => break,
                _ = cancel.cancelled() => {
                    tracing::warn!(scenario = %spec.name, "run cancelled");
                    abort_reason = Some(AbortReason::Cancelled);
                    break;
                }
                _ = threshold_ticker.tick(), if !evaluator.is_empty() => {
                    if let Some(breach) = evaluator.tick(&registry, started.elapsed()) {
                        tracing::warn!(
                            metric = %breach.metric,
                            expression = %breach.expression,
                            observed = ?breach.outcome.observed(),
                            "abort-on-fail threshold breached"
                        );
                        abort_reason = Some(AbortReason::Threshold {
                            metric: breach.metric,
                            expression: breach.expression,
                            observed: breach.outcome.observed(),
                        });
                        break;
                    }
                }
                _ = progress_ticker.tick(), if progress.is_some() => {
                    progress_tick += 1;
                    if let Some(cb) = &progress {
                        cb(build_update(
                            progress_tick,
                            started.elapsed().min(total),
                            &spec.name,
                            spec.executor,
                            &schedule,
                            &registry,
                        ));
                    }
                }
                res = &mut exec_task => {
                    exec_report = Some(res?);
                    break;
                }
            }
        }

        stop.cancel();
        if abort_reason.is_some() {
            set_state(RunState::Aborted);
        } else {
            set_state(RunState::RampingDown);
        }

        let exec_report = match exec_report {
            Some(r) => r,
            None => {
                let cancel_seen = matches!(abort_reason, Some(AbortReason::Cancelled));
                let grace = tokio::time::sleep(spec.graceful_stop);
                tokio::select! {
                    res = &mut exec_task => res?,
                    _ = grace => {
                        tracing::info!(
                            graceful_stop = ?spec.graceful_stop,
                            "graceful stop elapsed, interrupting in-flight iterations"
                        );
                        hard_stop.cancel();
                        exec_task.await?
                    }
                    _ = cancel.cancelled(), if !cancel_seen => {
                        tracing::warn!(scenario = %spec.name, "run cancelled while draining");
                        hard_stop.cancel();
                        if abort_reason.is_none() {
                            abort_reason = Some(AbortReason::Cancelled);
                            set_state(RunState::Aborted);
                        }
                        exec_task.await?
                    }
                }
            }
        };

        let elapsed = started.elapsed();
        let thresholds = evaluator.finish(&registry, elapsed);
        let aborted = abort_reason.is_some();
        let verdict = verdict_for(aborted, &thresholds);
        let state = if aborted {
            RunState::Aborted
        } else {
            set_state(RunState::Completed);
            RunState::Completed
        };

        tracing::info!(
            scenario = %spec.name,
            %verdict,
            ?elapsed,
            iterations = exec_report.completed,
            interrupted = exec_report.interrupted,
            dropped = exec_report.dropped,
            "run finished"
        );

        let series = registry.summarize();
        Ok(RunReport {
            scenario: spec.name.clone(),
            executor: spec.executor,
            verdict,
            state,
            abort_reason,
            elapsed,
            metrics: registry.views(),
            checks: summarize_checks(&registry, &series),
            series,
            thresholds,
            iterations_started: exec_report.started,
            iterations_completed: exec_report.completed,
            iterations_interrupted: exec_report.interrupted,
            iterations_dropped: exec_report.dropped,
            vus_allocated: exec_report.allocated_vus,
        })
    }
}

/// Validate and run `spec` in one call.
pub async fn run_scenario(
    spec: ScenarioSpec,
    options: RunOptions,
    iteration: impl Iteration,
) -> Result<RunReport> {
    RunController::new(spec, options)?.run(iteration).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Stage, ThresholdSet};
    use crate::error::{ConfigError, Error};
    use std::time::Duration;

    #[test]
    fn new_rejects_threshold_kind_mismatch_on_builtin() {
        let spec = ScenarioSpec::ramping_vus("s", 1, vec![Stage::new(Duration::from_secs(1), 1)])
            .with_threshold(ThresholdSet::new("http_reqs", ["p(95)<500"]));
        let err = RunController::new(spec, RunOptions::default()).err();
        assert!(matches!(
            err,
            Some(Error::Config(ConfigError::ThresholdKindMismatch { .. }))
        ));
    }

    #[test]
    fn new_starts_pending() {
        let spec = ScenarioSpec::ramping_vus("s", 1, vec![Stage::new(Duration::from_secs(1), 1)]);
        let ctl = RunController::new(spec, RunOptions::default()).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(*ctl.state_rx().borrow(), RunState::Pending);
        assert!(!ctl.cancel_handle().is_cancelled());
        assert_eq!(RunState::RampingDown.to_string(), "ramping-down");
    }
}
