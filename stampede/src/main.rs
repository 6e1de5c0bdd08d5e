mod cli;
mod exit_codes;
mod logging;
mod output;
mod run;
mod run_error;
mod scenario_yaml;
mod script;
mod template;

use clap::Parser;
use clap::error::ErrorKind;
use mimalloc::MiMalloc;

use crate::cli::{Cli, Command};
use crate::exit_codes::ExitCode;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() {
    let code = match Cli::try_parse() {
        Ok(cli) => {
            logging::init(cli.verbose);
            dispatch(cli.command).await
        }
        Err(err) => {
            let _ = err.print();
            match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Success,
                _ => ExitCode::InvalidInput,
            }
        }
    };
    std::process::exit(code.as_i32());
}

async fn dispatch(command: Command) -> ExitCode {
    match command {
        Command::Run(args) => run::run(args).await.unwrap_or_else(|err| {
            tracing::debug!(error = ?err, "run failed");
            eprintln!("error: {err}");
            err.exit_code()
        }),
    }
}
