//! authmux: recover AI coding-agent CLIs from rate-limit logouts.
//!
//! `coordinator` runs next to the multiplexer, `agent` runs where a browser
//! with logged-in accounts lives.

use clap::Parser;

mod agent;
mod api;
mod cli;
mod cmd_scan;
mod cmd_status;
mod coordinator;
mod daemon;
mod events;
mod redact;

fn init_tracing(verbose: bool) {
    let filter = std::env::var("AUTHMUX_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| if verbose { "debug" } else { "info" }.to_string());
    // stdout carries event lines and command output.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.verbose);

    match args.command {
        cli::Command::Coordinator(opts) => {
            tracing::info!("authmux coordinator starting");
            daemon::run_coordinator(opts).await?;
        }
        cli::Command::Agent(opts) => {
            tracing::info!("authmux agent starting");
            daemon::run_agent(opts).await?;
        }
        cli::Command::Scan(opts) => cmd_scan::cmd_scan(opts).await?,
        cli::Command::Status(opts) => cmd_status::cmd_status(opts).await?,
    }

    Ok(())
}
