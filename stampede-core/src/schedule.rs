use std::time::Duration;

use crate::config::Stage;

#[derive(Debug, Clone, PartialEq)]
pub struct StageSnapshot {
    /// 0-based.
    pub index: usize,
    pub count: usize,
    pub stage_elapsed: Duration,
    pub stage_remaining: Duration,
    pub start_target: u64,
    pub end_target: u64,
    pub current_target: u64,
}

/// Piecewise-linear ramp over elapsed run time.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    start: u64,
    stages: Vec<Stage>,
    cumulative_ends: Vec<Duration>,
}

struct Position {
    index: usize,
    stage_start: Duration,
    stage_end: Duration,
    start_target: u64,
    end_target: u64,
}

impl RampSchedule {
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut cumulative_ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for s in &stages {
            acc = acc.saturating_add(s.duration);
            cumulative_ends.push(acc);
        }

        Self {
            start,
            stages,
            cumulative_ends,
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.cumulative_ends
            .last()
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    // A boundary instant belongs to the stage that ends there.
    fn locate(&self, elapsed: Duration) -> Option<Position> {
        if self.stages.is_empty() {
            return None;
        }
        let clamped = elapsed.min(self.total_duration());
        let index = match self.cumulative_ends.binary_search(&clamped) {
            Ok(i) | Err(i) => i.min(self.stages.len() - 1),
        };

        let stage_start = match index {
            0 => Duration::ZERO,
            i => self.cumulative_ends[i - 1],
        };
        let start_target = match index {
            0 => self.start,
            i => self.stages[i - 1].target,
        };

        Some(Position {
            index,
            stage_start,
            stage_end: self.cumulative_ends[index],
            start_target,
            end_target: self.stages[index].target,
        })
    }

    /// Exact interpolated value at `elapsed`.
    pub fn value_at(&self, elapsed: Duration) -> f64 {
        let Some(pos) = self.locate(elapsed) else {
            return self.start as f64;
        };
        if elapsed.is_zero() {
            return self.start as f64;
        }

        let stage_duration = pos.stage_end.saturating_sub(pos.stage_start);
        let stage_elapsed = elapsed.min(pos.stage_end).saturating_sub(pos.stage_start);
        if stage_duration.is_zero() {
            return pos.end_target as f64;
        }

        let frac = stage_elapsed.as_secs_f64() / stage_duration.as_secs_f64();
        let start = pos.start_target as f64;
        start + (pos.end_target as f64 - start) * frac
    }

    /// Integer target at `elapsed`, rounded toward the stage's start target.
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        let Some(pos) = self.locate(elapsed) else {
            return self.start;
        };
        if elapsed.is_zero() {
            return self.start;
        }
        if elapsed >= pos.stage_end {
            return pos.end_target;
        }

        let start_i = pos.start_target as i128;
        let delta = pos.end_target as i128 - start_i;
        let num = elapsed.saturating_sub(pos.stage_start).as_nanos() as i128;
        let den = pos.stage_end.saturating_sub(pos.stage_start).as_nanos() as i128;

        let cur = start_i + (delta.saturating_mul(num) / den.max(1));
        cur.clamp(0, u64::MAX as i128) as u64
    }

    pub fn stage_snapshot_at(&self, elapsed: Duration) -> Option<StageSnapshot> {
        let pos = self.locate(elapsed)?;
        let clamped = elapsed.min(self.total_duration());
        let stage_duration = pos.stage_end.saturating_sub(pos.stage_start);
        let stage_elapsed = clamped.saturating_sub(pos.stage_start);

        Some(StageSnapshot {
            index: pos.index,
            count: self.stages.len(),
            stage_elapsed,
            stage_remaining: stage_duration.saturating_sub(stage_elapsed),
            start_target: pos.start_target,
            end_target: pos.end_target,
            current_target: self.target_at(clamped),
        })
    }

    /// The first stage boundary strictly after `elapsed`, if any.
    pub fn next_boundary_after(&self, elapsed: Duration) -> Option<Duration> {
        self.cumulative_ends.iter().copied().find(|end| *end > elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn schedule() -> RampSchedule {
        RampSchedule::new(
            0,
            vec![
                Stage::new(secs(10), 10),
                Stage::new(secs(10), 10),
                Stage::new(secs(10), 0),
            ],
        )
    }

    #[test]
    fn boundaries_hit_declared_targets() {
        let s = schedule();
        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(secs(10)), 10);
        assert_eq!(s.target_at(secs(20)), 10);
        assert_eq!(s.target_at(secs(30)), 0);
        assert_eq!(s.target_at(secs(99)), 0);
    }

    #[test]
    fn interpolates_linearly_inside_a_stage() {
        let s = schedule();
        assert_eq!(s.target_at(secs(5)), 5);
        assert_eq!(s.target_at(secs(15)), 10);
        assert_eq!(s.target_at(secs(25)), 5);
        assert!((s.value_at(Duration::from_millis(2_500)) - 2.5).abs() < 1e-9);
        assert!((s.value_at(Duration::from_millis(27_500)) - 2.5).abs() < 1e-9);
    }

    #[test]
    fn interpolation_is_monotonic_on_a_ramp_up() {
        let s = RampSchedule::new(3, vec![Stage::new(secs(7), 50)]);
        let mut prev = 0;
        for ms in (0..=7_000).step_by(100) {
            let t = s.target_at(Duration::from_millis(ms));
            assert!(t >= prev, "t={t} prev={prev} at {ms}ms");
            prev = t;
        }
        assert_eq!(prev, 50);
    }

    #[test]
    fn snapshot_reports_stage_position() {
        let s = schedule();
        let snap = s
            .stage_snapshot_at(secs(12))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(snap.index, 1);
        assert_eq!(snap.count, 3);
        assert_eq!(snap.stage_elapsed, secs(2));
        assert_eq!(snap.stage_remaining, secs(8));
        assert_eq!((snap.start_target, snap.end_target), (10, 10));

        let end = s
            .stage_snapshot_at(secs(40))
            .unwrap_or_else(|| panic!("expected snapshot"));
        assert_eq!(end.index, 2);
        assert_eq!(end.stage_remaining, Duration::ZERO);
    }

    #[test]
    fn next_boundary_skips_current_instant() {
        let s = schedule();
        assert_eq!(s.next_boundary_after(Duration::ZERO), Some(secs(10)));
        assert_eq!(s.next_boundary_after(secs(10)), Some(secs(20)));
        assert_eq!(s.next_boundary_after(secs(30)), None);
        assert_eq!(s.total_duration(), secs(30));
        assert!(s.is_done(secs(30)));
    }

    #[test]
    fn empty_schedule_holds_start() {
        let s = RampSchedule::new(4, Vec::new());
        assert_eq!(s.target_at(secs(3)), 4);
        assert!(s.stage_snapshot_at(secs(3)).is_none());
    }
}
