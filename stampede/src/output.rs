//! Terminal rendering of a run: a header before traffic starts, live progress, and the final
//! report. Human output goes to a TTY-aware progress bar; JSON output is one object per line.

use std::path::Path;

use stampede_core::{ProgressFn, RunReport, ScenarioSpec};

use crate::cli::OutputFormat;

mod human;
mod json;

pub(crate) trait Reporter: Send + Sync {
    fn header(&self, scenario_path: &Path, spec: &ScenarioSpec);

    /// Sink for controller progress ticks. `None` disables progress reporting.
    fn progress_sink(&self) -> Option<ProgressFn>;

    fn summary(&self, report: &RunReport) -> anyhow::Result<()>;
}

impl OutputFormat {
    pub(crate) fn reporter(self) -> Box<dyn Reporter> {
        match self {
            Self::HumanReadable => Box::new(human::HumanReadableOutput::new()),
            Self::Json => Box::new(json::JsonOutput),
        }
    }
}
