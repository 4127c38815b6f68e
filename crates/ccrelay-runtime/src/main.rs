//! ccrelay: relay terminal coding agents running in tmux to a chat client.

use clap::Parser;

use ccrelay_runtime::cli::{Cli, Command};
use ccrelay_runtime::{daemon, hook, status};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Command::Daemon(opts) => {
            let filter = std::env::var("CCRELAY_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .with_writer(std::io::stderr)
                .init();

            daemon::run_daemon(&cli, opts).await?;
        }
        Command::Hook => {
            // A failing hook must not disturb the agent.
            if let Err(e) = hook::run_hook(&cli) {
                eprintln!("ccrelay hook: {e:#}");
            }
        }
        Command::Status => status::run_status(&cli)?,
    }

    Ok(())
}
