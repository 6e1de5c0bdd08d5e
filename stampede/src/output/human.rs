use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stampede_core::{ExecutorKind, ProgressFn, ProgressUpdate, RunReport, ScenarioSpec};

mod format;
mod progress;
mod summary;

use format::{format_duration, format_rate};
use progress::HumanProgress;
use summary::render;

use super::Reporter;

pub(crate) struct HumanReadableOutput {
    progress: Arc<HumanProgress>,
    total_ms: Arc<AtomicU64>,
}

impl HumanReadableOutput {
    pub(crate) fn new() -> Self {
        Self {
            progress: Arc::new(HumanProgress::new()),
            total_ms: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Reporter for HumanReadableOutput {
    fn header(&self, scenario_path: &Path, spec: &ScenarioSpec) {
        let total = spec.total_duration();
        self.total_ms.store(total.as_millis() as u64, Ordering::Relaxed);

        println!("scenario file: {}", scenario_path.display());
        let shape = match spec.executor {
            ExecutorKind::RampingVus => {
                format!("start_vus={} peak_vus={}", spec.start_vus, spec.peak_vus())
            }
            ExecutorKind::RampingArrivalRate => format!(
                "start_rate={}/{} pre_allocated_vus={} max_vus={}",
                spec.start_rate,
                format_duration(spec.time_unit),
                spec.pre_allocated_vus,
                spec.max_vus()
            ),
        };
        println!(
            "scenario: {} executor={} stages={} duration={} {shape}",
            spec.name,
            spec.executor,
            spec.stages.len(),
            format_duration(total)
        );
        println!();
    }

    fn progress_sink(&self) -> Option<ProgressFn> {
        let progress = self.progress.clone();
        let total_ms = self.total_ms.clone();
        let prev: Arc<Mutex<(Duration, u64)>> = Arc::new(Mutex::new((Duration::ZERO, 0)));

        Some(Arc::new(move |u: ProgressUpdate| {
            let iters_per_sec = {
                let mut prev = prev.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let (prev_elapsed, prev_iters) = *prev;
                *prev = (u.elapsed, u.iterations);
                let dt = u.elapsed.saturating_sub(prev_elapsed).as_secs_f64().max(1e-9);
                u.iterations.saturating_sub(prev_iters) as f64 / dt
            };

            let mut msg = match &u.stage {
                Some(stage) => format!(
                    "stage={}/{} target={} stage_remaining={}",
                    stage.index + 1,
                    stage.count,
                    u.target,
                    format_duration(stage.stage_remaining)
                ),
                None => format!("ramp-down target={}", u.target),
            };
            msg.push_str(&format!(
                " vus={}/{} iters={} iters/s={} elapsed={}",
                u.active_vus,
                u.allocated_vus,
                u.iterations,
                format_rate(iters_per_sec),
                format_duration(u.elapsed)
            ));
            if u.dropped > 0 {
                msg.push_str(&format!(" dropped={}", u.dropped));
            }
            if u.interrupted > 0 {
                msg.push_str(&format!(" interrupted={}", u.interrupted));
            }

            let total = Duration::from_millis(total_ms.load(Ordering::Relaxed));
            progress.update(&u.scenario, total, u.elapsed, msg);
        }))
    }

    fn summary(&self, report: &RunReport) -> anyhow::Result<()> {
        self.progress.finish();
        print!("{}", render(report));

        let violations: Vec<_> = report.violations().collect();
        if !violations.is_empty() {
            eprintln!("thresholds failed:");
            for v in violations {
                match v.outcome.observed() {
                    Some(obs) => eprintln!("  {}: {} (observed {obs})", v.metric, v.expression),
                    None => eprintln!("  {}: {}", v.metric, v.expression),
                }
            }
        }

        Ok(())
    }
}
