mod arrival_rate;
mod pacer;
mod ramping_vus;

pub(crate) use arrival_rate::RampingArrivalRate;
pub(crate) use ramping_vus::RampingVus;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::builtin::IterationMetrics;
use crate::iteration::{Iteration, IterationContext, IterationShared};

/// Everything a strategy needs to drive iterations.
pub(crate) struct ExecutorEnv {
    pub(crate) iteration: Arc<dyn Iteration>,
    pub(crate) shared: Arc<IterationShared>,
    pub(crate) metrics: IterationMetrics,
    /// Run clock origin.
    pub(crate) started: Instant,
    /// No new iterations once cancelled.
    pub(crate) stop: CancellationToken,
    /// In-flight iterations are aborted once cancelled.
    pub(crate) hard_stop: CancellationToken,
    counts: IterationCounts,
}

impl ExecutorEnv {
    pub(crate) fn new(
        iteration: Arc<dyn Iteration>,
        shared: Arc<IterationShared>,
        metrics: IterationMetrics,
        started: Instant,
        stop: CancellationToken,
        hard_stop: CancellationToken,
    ) -> Self {
        Self {
            iteration,
            shared,
            metrics,
            started,
            stop,
            hard_stop,
            counts: IterationCounts::default(),
        }
    }

    pub(crate) fn report(&self, dropped: u64, allocated_vus: u64) -> ExecutorReport {
        ExecutorReport {
            started: self.counts.started.load(Ordering::Relaxed),
            completed: self.counts.completed.load(Ordering::Relaxed),
            interrupted: self.counts.interrupted.load(Ordering::Relaxed),
            dropped,
            allocated_vus,
        }
    }
}

#[derive(Debug, Default)]
struct IterationCounts {
    started: AtomicU64,
    completed: AtomicU64,
    interrupted: AtomicU64,
}

/// Totals a strategy reports once all of its workers have exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorReport {
    pub started: u64,
    /// Finished on their own, successfully or not.
    pub completed: u64,
    /// Force-cancelled by a ramp-down or stop deadline.
    pub interrupted: u64,
    pub dropped: u64,
    /// Workers allocated over the run.
    pub allocated_vus: u64,
}

pub(crate) trait Executor {
    fn run(self, env: Arc<ExecutorEnv>) -> impl Future<Output = ExecutorReport> + Send;
}

/// Marks a ramping worker as retirable while its iteration runs.
pub(crate) struct Retire<'a> {
    pub(crate) target_rx: &'a mut watch::Receiver<u64>,
    pub(crate) vu_index: u64,
    pub(crate) grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IterationEnd {
    Completed,
    Interrupted,
}

async fn target_changed(rx: Option<&mut watch::Receiver<u64>>) -> u64 {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => *rx.borrow_and_update(),
            // Sizer gone: the target is final.
            Err(_) => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

/// Run one iteration in its own task and record exactly one outcome for it.
///
/// A panic becomes a failed iteration. The task is aborted and counted as interrupted when
/// the hard stop fires, or when the worker stays excess for longer than the retire grace.
pub(crate) async fn drive_iteration(
    env: &ExecutorEnv,
    vu_id: u64,
    iteration: u64,
    mut retire: Option<Retire<'_>>,
) -> IterationEnd {
    let ctx = IterationContext::new(vu_id, iteration, env.shared.clone());
    let started = Instant::now();
    let mut task = tokio::spawn(env.iteration.run(ctx));
    env.counts.started.fetch_add(1, Ordering::Relaxed);

    let mut retire_at: Option<Instant> = None;

    let interrupted = loop {
        tokio::select! {
            res = &mut task => {
                match res {
                    Ok(outcome) => {
                        env.metrics.record_completed(outcome.success, outcome.duration);
                        let tags = env.shared.base_tags();
                        for sample in &outcome.samples {
                            if let Err(err) = env.shared.registry.record_tagged(sample, &tags) {
                                tracing::warn!(%err, vu_id, "dropping iteration sample");
                            }
                        }
                    }
                    Err(err) if err.is_panic() => {
                        tracing::warn!(vu_id, iteration, "iteration panicked");
                        env.metrics.record_completed(false, started.elapsed());
                    }
                    Err(_) => break true,
                }
                break false;
            }
            _ = env.hard_stop.cancelled() => {
                task.abort();
                break true;
            }
            target = target_changed(retire.as_mut().map(|r| &mut *r.target_rx)) => {
                if let Some(r) = &retire {
                    if target < r.vu_index {
                        retire_at.get_or_insert_with(|| Instant::now() + r.grace);
                    } else {
                        retire_at = None;
                    }
                }
            }
            _ = tokio::time::sleep_until(retire_at.unwrap_or_else(Instant::now)), if retire_at.is_some() => {
                tracing::debug!(vu_id, "ramp-down grace elapsed, cancelling iteration");
                task.abort();
                break true;
            }
        }
    };

    if interrupted {
        env.metrics.record_interrupted();
        env.counts.interrupted.fetch_add(1, Ordering::Relaxed);
        IterationEnd::Interrupted
    } else {
        env.counts.completed.fetch_add(1, Ordering::Relaxed);
        IterationEnd::Completed
    }
}
