use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use super::{Executor, ExecutorEnv, ExecutorReport, Retire, drive_iteration};
use crate::schedule::RampSchedule;

/// A pool of long-lived workers sized to the peak target, of which the first `target` run.
///
/// Worker `i` (1-based) is active while the current target is at least `i`. A worker that
/// becomes excess finishes its in-flight iteration, or is interrupted once `graceful_ramp_down`
/// elapses, and then parks until the target climbs back.
#[derive(Debug, Clone)]
pub(crate) struct RampingVus {
    pub(crate) schedule: RampSchedule,
    pub(crate) pool: u64,
    pub(crate) graceful_ramp_down: Duration,
    pub(crate) ramp_tick: Duration,
}

impl Executor for RampingVus {
    async fn run(self, env: Arc<ExecutorEnv>) -> ExecutorReport {
        let (target_tx, target_rx) = watch::channel(self.schedule.target_at(Duration::ZERO));
        env.metrics.set_vus_max(self.pool);

        let sizer = tokio::spawn(run_sizer(
            env.clone(),
            self.schedule.clone(),
            self.ramp_tick,
            target_tx,
        ));

        let mut workers = JoinSet::new();
        for vu_id in 1..=self.pool {
            workers.spawn(run_worker(
                env.clone(),
                vu_id,
                target_rx.clone(),
                self.graceful_ramp_down,
            ));
        }
        drop(target_rx);

        while let Some(res) = workers.join_next().await {
            if let Err(err) = res {
                tracing::warn!(%err, "vu worker failed");
            }
        }
        sizer.abort();

        env.report(0, self.pool)
    }
}

/// Publish the schedule's target on every `ramp_tick` and at every stage boundary.
async fn run_sizer(
    env: Arc<ExecutorEnv>,
    schedule: RampSchedule,
    ramp_tick: Duration,
    target_tx: watch::Sender<u64>,
) {
    loop {
        let elapsed = env.started.elapsed();
        let target = schedule.target_at(elapsed);
        target_tx.send_if_modified(|cur| {
            if *cur == target {
                return false;
            }
            tracing::debug!(from = *cur, to = target, ?elapsed, "vu target changed");
            *cur = target;
            true
        });

        if schedule.is_done(elapsed) {
            break;
        }

        let mut wake = elapsed.saturating_add(ramp_tick);
        if let Some(boundary) = schedule.next_boundary_after(elapsed) {
            wake = wake.min(boundary);
        }

        tokio::select! {
            _ = tokio::time::sleep_until(env.started + wake) => {}
            _ = env.stop.cancelled() => break,
        }
    }
}

async fn run_worker(
    env: Arc<ExecutorEnv>,
    vu_id: u64,
    mut target_rx: watch::Receiver<u64>,
    graceful_ramp_down: Duration,
) {
    let mut iteration = 0u64;

    'park: loop {
        loop {
            if env.stop.is_cancelled() {
                return;
            }
            if *target_rx.borrow_and_update() >= vu_id {
                break;
            }
            tokio::select! {
                res = target_rx.changed() => {
                    if res.is_err() {
                        // Final target leaves this worker excess.
                        return;
                    }
                }
                _ = env.stop.cancelled() => return,
            }
        }

        let _active = env.metrics.enter_active();
        loop {
            if env.stop.is_cancelled() {
                return;
            }
            if *target_rx.borrow() < vu_id {
                continue 'park;
            }

            let retire = Retire {
                target_rx: &mut target_rx,
                vu_index: vu_id,
                grace: graceful_ramp_down,
            };
            drive_iteration(&env, vu_id, iteration, Some(retire)).await;
            iteration += 1;
        }
    }
}
