use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;

/// One leg of the ramp: reach `target` after `duration`, starting from the previous target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

impl Stage {
    pub fn new(duration: Duration, target: u64) -> Self {
        Self { duration, target }
    }
}

/// Scenario executor kind (the string form used by scenario files).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum ExecutorKind {
    #[strum(serialize = "ramping-vus")]
    RampingVus,

    #[strum(serialize = "ramping-arrival-rate", serialize = "ramping-rps")]
    RampingArrivalRate,
}

pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);
pub const DEFAULT_TIME_UNIT: Duration = Duration::from_secs(1);

/// One threshold entry as written by the user, before parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec {
    pub expression: String,
    pub abort_on_fail: bool,
    pub delay_abort_eval: Option<Duration>,
}

impl ThresholdSpec {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            abort_on_fail: false,
            delay_abort_eval: None,
        }
    }

    #[must_use]
    pub fn abort_on_fail(mut self) -> Self {
        self.abort_on_fail = true;
        self
    }

    #[must_use]
    pub fn delay_abort_eval(mut self, delay: Duration) -> Self {
        self.delay_abort_eval = Some(delay);
        self
    }
}

impl From<&str> for ThresholdSpec {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// All thresholds declared for one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSet {
    pub metric: String,
    pub expressions: Vec<ThresholdSpec>,
}

impl ThresholdSet {
    pub fn new(
        metric: impl Into<String>,
        expressions: impl IntoIterator<Item = impl Into<ThresholdSpec>>,
    ) -> Self {
        Self {
            metric: metric.into(),
            expressions: expressions.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSpec {
    pub name: String,
    pub executor: ExecutorKind,
    pub stages: Vec<Stage>,

    // Ramping VUs
    pub start_vus: u64,
    pub graceful_ramp_down: Option<Duration>,

    // Ramping arrival rate
    pub start_rate: u64,
    pub time_unit: Duration,
    pub pre_allocated_vus: u64,
    pub max_vus: Option<u64>,

    pub graceful_stop: Duration,
    pub thresholds: Vec<ThresholdSet>,

    /// Extra tags attached to every sample recorded by this scenario.
    pub tags: Vec<(String, String)>,
}

impl ScenarioSpec {
    pub fn new(name: impl Into<String>, executor: ExecutorKind, stages: Vec<Stage>) -> Self {
        Self {
            name: name.into(),
            executor,
            stages,
            start_vus: 0,
            graceful_ramp_down: None,
            start_rate: 0,
            time_unit: DEFAULT_TIME_UNIT,
            pre_allocated_vus: 1,
            max_vus: None,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
            thresholds: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn ramping_vus(name: impl Into<String>, start_vus: u64, stages: Vec<Stage>) -> Self {
        Self {
            start_vus,
            ..Self::new(name, ExecutorKind::RampingVus, stages)
        }
    }

    pub fn ramping_arrival_rate(
        name: impl Into<String>,
        start_rate: u64,
        pre_allocated_vus: u64,
        max_vus: u64,
        stages: Vec<Stage>,
    ) -> Self {
        Self {
            start_rate,
            pre_allocated_vus,
            max_vus: Some(max_vus),
            ..Self::new(name, ExecutorKind::RampingArrivalRate, stages)
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, set: ThresholdSet) -> Self {
        self.thresholds.push(set);
        self
    }

    #[must_use]
    pub fn with_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }

    pub fn max_vus(&self) -> u64 {
        self.max_vus.unwrap_or(self.pre_allocated_vus)
    }

    pub fn graceful_ramp_down(&self) -> Duration {
        self.graceful_ramp_down.unwrap_or(self.graceful_stop)
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |acc, st| acc.saturating_add(st.duration))
    }

    /// Largest pool a ramping-vus run ever needs.
    pub fn peak_vus(&self) -> u64 {
        let max_stage = self.stages.iter().map(|st| st.target).max().unwrap_or(0);
        max_stage.max(self.start_vus)
    }

    /// Structural checks. Thresholds are checked by the controller, which knows metric kinds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stages.is_empty() {
            return Err(ConfigError::EmptyStages);
        }
        if let Some(index) = self.stages.iter().position(|st| st.duration.is_zero()) {
            return Err(ConfigError::ZeroStageDuration { index });
        }

        match self.executor {
            ExecutorKind::RampingVus => {
                if self.peak_vus() == 0 {
                    return Err(ConfigError::NoVus);
                }
            }
            ExecutorKind::RampingArrivalRate => {
                if self.time_unit.is_zero() {
                    return Err(ConfigError::InvalidTimeUnit);
                }
                if self.pre_allocated_vus == 0 {
                    return Err(ConfigError::InvalidPreAllocatedVus);
                }
                let max_vus = self.max_vus();
                if max_vus < self.pre_allocated_vus {
                    return Err(ConfigError::InvalidMaxVus {
                        pre_allocated_vus: self.pre_allocated_vus,
                        max_vus,
                    });
                }
            }
        }

        Ok(())
    }
}

pub type EnvVars = Arc<[(Arc<str>, Arc<str>)]>;

pub fn env_from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> EnvVars {
    let vars: Vec<(Arc<str>, Arc<str>)> = pairs
        .into_iter()
        .map(|(k, v)| (Arc::<str>::from(k), Arc::<str>::from(v)))
        .collect();
    Arc::from(vars.into_boxed_slice())
}

/// Engine cadences and run-scoped inputs that are not part of the scenario itself.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// How often thresholds are evaluated while the run is live.
    pub threshold_tick: Duration,
    /// How often the ramping-vus pool target is recomputed inside a stage.
    pub ramp_tick: Duration,
    /// Arrival-rate scheduling granularity.
    pub pacer_tick: Duration,
    /// Cadence of progress callbacks.
    pub progress_tick: Duration,
    pub env: EnvVars,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            threshold_tick: Duration::from_secs(1),
            ramp_tick: Duration::from_secs(1),
            pacer_tick: Duration::from_millis(10),
            progress_tick: Duration::from_secs(1),
            env: Arc::from(Vec::<(Arc<str>, Arc<str>)>::new()),
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, tick) in [
            ("threshold_tick", self.threshold_tick),
            ("ramp_tick", self.ramp_tick),
            ("pacer_tick", self.pacer_tick),
            ("progress_tick", self.progress_tick),
        ] {
            if tick.is_zero() {
                return Err(ConfigError::ZeroTick { name });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn executor_kind_accepts_aliases() {
        assert_eq!(
            "ramping-vus".parse::<ExecutorKind>().ok(),
            Some(ExecutorKind::RampingVus)
        );
        assert_eq!(
            "ramping-rps".parse::<ExecutorKind>().ok(),
            Some(ExecutorKind::RampingArrivalRate)
        );
        assert!("constant-vus".parse::<ExecutorKind>().is_err());
        assert_eq!(
            ExecutorKind::RampingArrivalRate.to_string(),
            "ramping-arrival-rate"
        );
    }

    #[test]
    fn defaults_follow_k6() {
        let s = ScenarioSpec::new("default", ExecutorKind::RampingArrivalRate, vec![]);
        assert_eq!(s.graceful_stop, secs(30));
        assert_eq!(s.graceful_ramp_down(), secs(30));
        assert_eq!(s.time_unit, secs(1));
        assert_eq!(s.pre_allocated_vus, 1);
        assert_eq!(s.max_vus(), 1);
    }

    #[test]
    fn rejects_empty_and_zero_length_stages() {
        let s = ScenarioSpec::ramping_vus("s", 1, vec![]);
        assert_eq!(s.validate(), Err(ConfigError::EmptyStages));

        let s = ScenarioSpec::ramping_vus(
            "s",
            1,
            vec![Stage::new(secs(1), 1), Stage::new(Duration::ZERO, 2)],
        );
        assert_eq!(s.validate(), Err(ConfigError::ZeroStageDuration { index: 1 }));
    }

    #[test]
    fn rejects_vu_scenario_without_any_vus() {
        let s = ScenarioSpec::ramping_vus("s", 0, vec![Stage::new(secs(5), 0)]);
        assert_eq!(s.validate(), Err(ConfigError::NoVus));
    }

    #[test]
    fn rejects_preallocated_above_max() {
        let s = ScenarioSpec::ramping_arrival_rate("s", 10, 100, 50, vec![Stage::new(secs(5), 10)]);
        assert_eq!(
            s.validate(),
            Err(ConfigError::InvalidMaxVus {
                pre_allocated_vus: 100,
                max_vus: 50
            })
        );
    }

    #[test]
    fn rejects_zero_time_unit_and_preallocated() {
        let mut s = ScenarioSpec::ramping_arrival_rate("s", 1, 1, 1, vec![Stage::new(secs(1), 1)]);
        s.time_unit = Duration::ZERO;
        assert_eq!(s.validate(), Err(ConfigError::InvalidTimeUnit));

        let mut s = ScenarioSpec::ramping_arrival_rate("s", 1, 1, 1, vec![Stage::new(secs(1), 1)]);
        s.pre_allocated_vus = 0;
        assert_eq!(s.validate(), Err(ConfigError::InvalidPreAllocatedVus));
    }

    #[test]
    fn zero_ticks_are_rejected() {
        let opts = RunOptions {
            pacer_tick: Duration::ZERO,
            ..RunOptions::default()
        };
        assert_eq!(
            opts.validate(),
            Err(ConfigError::ZeroTick { name: "pacer_tick" })
        );
    }
}
