mod cli;
mod env_file;
mod error;
mod model;
mod orchestrator;
mod runner;
mod toolchain;
#[cfg(feature = "tui")]
mod tui;
mod workflow;

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(&args)?;

    match cli::run(args).await {
        Ok(0) => Ok(()),
        // Non-zero workflow outcomes (failed step, cancel) map straight to the process code.
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "ilaunch failed");
            Err(e)
        }
    }
}

/// Route diagnostics to `--log-file`, stderr (non-interactive), or nowhere (TUI owns the terminal).
fn init_tracing(args: &cli::Cli) -> Result<()> {
    let make_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = args.log_file.as_deref() {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file {}", path.display()))?;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(make_filter())
            .with_target(true)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .try_init();
    } else if args.non_interactive {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(make_filter())
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(make_filter())
            .with_writer(std::io::sink)
            .try_init();
    }
    Ok(())
}
