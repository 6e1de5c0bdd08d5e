use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    let d = humantime::parse_duration(s)
        .map_err(|e| format!("invalid duration '{s}' (expected e.g. 10s, 250ms, 1m): {e}"))?;
    if d.is_zero() {
        return Err(format!("duration '{s}' must be positive"));
    }
    Ok(d)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Progress bar on stderr and a text summary on stdout.
    HumanReadable,
    /// Emit JSON progress lines and a final summary line (NDJSON) to stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "stampede",
    author,
    version,
    about = "Stage-driven HTTP load testing",
    long_about = "stampede drives virtual users (or a target arrival rate) through time-boxed stages, records k6-style metrics and evaluates pass/fail thresholds while the test runs.\n\nA scenario is a YAML file declaring the executor, its stages, thresholds and the HTTP requests every iteration performs.\n\nEnvironment variables from the current process are visible to `${VAR}` placeholders; use `--env KEY=VALUE` to add/override values.",
    after_help = "Examples:\n  stampede run scenarios/search.yaml\n  stampede run scenarios/login.yaml --base-url http://localhost:3000\n  stampede run scenarios/search.yaml --output json --env TEST_QUERY=phone\n\nExit codes: 0 pass, 11 thresholds failed, 12 aborted, 30 invalid input, 40 runtime error."
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug). `STAMPEDE_LOG` / `RUST_LOG` take precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a scenario file
    #[command(
        long_about = "Run a YAML scenario until its stages elapse, then print the summary.\n\nThe exit code reflects the verdict: thresholds failing at the end exit 11, an abort-on-fail threshold or Ctrl-C exits 12."
    )]
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the scenario (.yaml / .yml)
    pub scenario: PathBuf,

    /// Add/override env vars visible to `${VAR}` placeholders (repeatable, KEY=VALUE).
    /// CLI-provided vars override the scenario `env:` block and the current process env.
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Base URL prepended to request paths (overrides `baseUrl` and `BASE_URL`).
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,

    /// How often thresholds are evaluated while the run is live (e.g. 1s, 500ms)
    #[arg(long, value_parser = parse_duration)]
    pub threshold_tick: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_humantime_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("10s"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_duration("1m 30s"), Ok(Duration::from_secs(90)));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("0s").is_err());
    }

    #[test]
    fn cli_parses_run_with_overrides() {
        let parsed = Cli::try_parse_from([
            "stampede",
            "run",
            "search.yaml",
            "--env",
            "FOO=bar",
            "--env",
            "EMPTY=",
            "--base-url",
            "http://127.0.0.1:8080",
            "--threshold-tick",
            "250ms",
            "--output",
            "json",
            "-vv",
        ]);

        let cli = match parsed {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };

        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.scenario, PathBuf::from("search.yaml"));
                assert_eq!(args.env, vec!["FOO=bar".to_string(), "EMPTY=".to_string()]);
                assert_eq!(args.base_url.as_deref(), Some("http://127.0.0.1:8080"));
                assert_eq!(args.threshold_tick, Some(Duration::from_millis(250)));
                assert_eq!(args.output, OutputFormat::Json);
            }
        }
    }

    #[test]
    fn cli_defaults_to_human_output() {
        let cli = match Cli::try_parse_from(["stampede", "run", "s.yaml"]) {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        };
        assert_eq!(cli.verbose, 0);
        let Command::Run(args) = cli.command;
        assert_eq!(args.output, OutputFormat::HumanReadable);
        assert!(args.threshold_tick.is_none());
    }
}
