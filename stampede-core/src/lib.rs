#![forbid(unsafe_code)]

pub mod builtin;
pub mod config;
pub mod controller;
pub mod error;
mod executor;
pub mod iteration;
pub mod progress;
pub mod report;
pub mod schedule;
pub mod thresholds;
pub mod thresholds_eval;

pub use config::{
    EnvVars, ExecutorKind, RunOptions, ScenarioSpec, Stage, ThresholdSet, ThresholdSpec,
    env_from_pairs,
};
pub use controller::{CancelHandle, RunController, RunState, run_scenario};
pub use error::{ConfigError, Error, Result};
pub use executor::ExecutorReport;
pub use iteration::{BoxIterationFuture, Iteration, IterationContext, IterationOutcome};
pub use progress::{ProgressFn, ProgressUpdate};
pub use report::{AbortReason, CheckSummary, RunReport, Verdict};
pub use schedule::{RampSchedule, StageSnapshot};
pub use thresholds::{ThresholdExpr, compile_thresholds, parse_metric_key, parse_threshold_expr};
pub use thresholds_eval::{ThresholdEvaluator, ThresholdOutcome, ThresholdResult};

pub use stampede_http::{HttpClient, HttpRequest, HttpResponse, Method};
pub use stampede_metrics::{
    AggregateView, MetricKind, MetricSample, MetricSeriesSummary, MetricValue, Registry,
    TrendSummary,
};
