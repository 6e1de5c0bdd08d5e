use stampede_metrics::MetricKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid scenario configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Metrics(#[from] stampede_metrics::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Rejections raised before any worker starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("`stages` must be a non-empty array of {{ duration, target }}")]
    EmptyStages,

    #[error("stage {index} has a zero duration")]
    ZeroStageDuration { index: usize },

    #[error("invalid `executor` `{0}` (expected `ramping-vus` or `ramping-arrival-rate`)")]
    InvalidExecutor(String),

    #[error("ramping-vus scenario never has a positive VU target")]
    NoVus,

    #[error("`time_unit` must be a positive duration")]
    InvalidTimeUnit,

    #[error("`pre_allocated_vus` must be a positive integer")]
    InvalidPreAllocatedVus,

    #[error("`max_vus` ({max_vus}) must be >= `pre_allocated_vus` ({pre_allocated_vus})")]
    InvalidMaxVus { pre_allocated_vus: u64, max_vus: u64 },

    #[error("invalid threshold `{expression}` on `{metric}`: {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("threshold `{expression}` cannot apply to {kind} metric `{metric}`")]
    ThresholdKindMismatch {
        metric: String,
        expression: String,
        kind: MetricKind,
    },

    #[error("`{name}` must be a positive duration")]
    ZeroTick { name: &'static str },
}
