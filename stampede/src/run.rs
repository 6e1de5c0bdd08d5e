use stampede_core::{RunController, RunOptions};

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::run_error::RunError;
use crate::scenario_yaml;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = args.output.reporter();

    let overrides =
        scenario_yaml::parse_env_overrides(&args.env).map_err(RunError::invalid_input)?;
    let loaded = scenario_yaml::load_scenario(
        &args.scenario,
        std::env::vars(),
        &overrides,
        args.base_url.as_deref(),
    )
    .await
    .map_err(RunError::invalid_input)?;

    let mut options = RunOptions {
        env: loaded.env,
        ..RunOptions::default()
    };
    if let Some(tick) = args.threshold_tick {
        options.threshold_tick = tick;
    }

    let mut controller = RunController::new(loaded.spec, options)?;
    out.header(&args.scenario, controller.spec());
    if let Some(progress) = out.progress_sink() {
        controller = controller.with_progress(progress);
    }

    let cancel = controller.cancel_handle();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, aborting run");
            cancel.cancel();
        }
    });

    let report = controller.run(loaded.script.into_iteration()).await;
    signal.abort();
    let report = report?;

    out.summary(&report).map_err(RunError::runtime)?;
    Ok(ExitCode::from_verdict(report.verdict))
}
