use std::net::SocketAddr;

use anyhow::Context as _;
use stampede_testserver::{TEST_USER_EMAIL, TEST_USER_PASSWORD, TestServerStats, router};
use tokio::net::TcpListener;

const USAGE: &str = "\
stampede-testserver: local target for stampede scenarios

USAGE:
  stampede-testserver [--bind ADDR] [--port PORT]

Prints BASE_URL, TEST_USER_EMAIL and TEST_USER_PASSWORD as KEY=VALUE lines once listening.
Ctrl-C stops the server and prints request counters to stderr.";

fn parse_bind(mut args: impl Iterator<Item = String>) -> anyhow::Result<Option<SocketAddr>> {
    let mut bind: SocketAddr = ([127, 0, 0, 1], 0).into();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => {
                let value = args.next().context("--bind needs an address such as 127.0.0.1:0")?;
                bind = value
                    .parse()
                    .with_context(|| format!("invalid --bind address `{value}`"))?;
            }
            "--port" => {
                let value = args.next().context("--port needs a number")?;
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("invalid --port `{value}`"))?;
                bind.set_port(port);
            }
            "-h" | "--help" => return Ok(None),
            other => anyhow::bail!("unknown argument `{other}`\n\n{USAGE}"),
        }
    }
    Ok(Some(bind))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let Some(bind) = parse_bind(std::env::args().skip(1))? else {
        eprintln!("{USAGE}");
        return Ok(());
    };

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    let addr = listener.local_addr()?;
    let stats = TestServerStats::default();

    println!("BASE_URL=http://{addr}");
    println!("TEST_USER_EMAIL={TEST_USER_EMAIL}");
    println!("TEST_USER_PASSWORD={TEST_USER_PASSWORD}");

    axum::serve(listener, router(stats.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    eprintln!(
        "served {} requests ({} logins, {} rejected logins, {} searches)",
        stats.requests_total(),
        stats.logins_ok(),
        stats.logins_rejected(),
        stats.searches()
    );
    Ok(())
}
