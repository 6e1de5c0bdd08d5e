use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use super::pacer::ArrivalPacer;
use super::{Executor, ExecutorEnv, ExecutorReport, drive_iteration};
use crate::schedule::RampSchedule;

/// Starts iterations at a ramped rate of `target` per `time_unit`, independent of how long
/// each one takes.
///
/// Starts that find every one of `max_vus` workers busy are dropped and counted.
#[derive(Debug, Clone)]
pub(crate) struct RampingArrivalRate {
    pub(crate) schedule: RampSchedule,
    pub(crate) time_unit: Duration,
    pub(crate) pre_allocated_vus: u64,
    pub(crate) max_vus: u64,
    pub(crate) pacer_tick: Duration,
}

impl Executor for RampingArrivalRate {
    async fn run(self, env: Arc<ExecutorEnv>) -> ExecutorReport {
        let pacer = Arc::new(ArrivalPacer::new(self.pre_allocated_vus, self.max_vus));
        let mut workers = JoinSet::new();
        let mut next_vu = 0u64;
        for _ in 0..self.pre_allocated_vus {
            next_vu += 1;
            workers.spawn(run_worker(env.clone(), pacer.clone(), next_vu));
        }
        env.metrics.set_vus_max(self.pre_allocated_vus);

        let total = self.schedule.total_duration();
        let unit = self.time_unit.as_secs_f64();

        let mut ticker = tokio::time::interval(self.pacer_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_elapsed = Duration::ZERO;
        let mut last_rate = self.schedule.value_at(Duration::ZERO);
        let mut carry = 0.0f64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = env.stop.cancelled() => break,
            }

            let elapsed = env.started.elapsed().min(total);
            let rate = self.schedule.value_at(elapsed);

            // Trapezoid over the measured tick length, not the nominal one.
            let dt = elapsed.saturating_sub(last_elapsed).as_secs_f64();
            carry += (last_rate + rate) / 2.0 * dt / unit;
            last_elapsed = elapsed;
            last_rate = rate;

            let due = (carry + 1e-9).floor().max(0.0);
            carry = (carry - due).max(0.0);
            let due = due as u64;

            if due != 0 {
                let admission = pacer.admit(due);
                for _ in 0..admission.spawn {
                    next_vu += 1;
                    workers.spawn(run_worker(env.clone(), pacer.clone(), next_vu));
                }
                if admission.spawn != 0 {
                    env.metrics.set_vus_max(pacer.allocated());
                    tracing::debug!(allocated = pacer.allocated(), "grew arrival-rate pool");
                }
                if admission.dropped != 0 {
                    env.metrics.record_dropped(admission.dropped);
                    tracing::debug!(dropped = admission.dropped, "no free vu, iterations dropped");
                }
            }

            if elapsed >= total {
                break;
            }
        }

        pacer.finish();
        while let Some(res) = workers.join_next().await {
            if let Err(err) = res {
                tracing::warn!(%err, "arrival-rate worker failed");
            }
        }

        env.report(pacer.dropped_total(), pacer.allocated())
    }
}

async fn run_worker(env: Arc<ExecutorEnv>, pacer: Arc<ArrivalPacer>, vu_id: u64) {
    let mut iteration = 0u64;
    while pacer.claim().await {
        let active = env.metrics.enter_active();
        drive_iteration(&env, vu_id, iteration, None).await;
        drop(active);
        pacer.release();
        iteration += 1;
    }
}
