mod api;
mod cli;
mod cloud;
mod command;
mod compat;
mod config;
mod credentials;
mod ctl;
mod docker;
mod health;
mod helm;
mod hosts;
mod k8s;
mod names;
mod output;
mod polling;
mod rasax;
mod state;
mod tui;
mod values;

use clap::Parser;
use cli::Cli;
use colored::Colorize;
use config::Settings;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Log to stderr; `RUST_LOG` overrides the level picked by the flags.
fn init_tracing(verbose: bool, debug: bool) -> WorkerGuard {
    let level = if debug {
        "rasactl=debug"
    } else if verbose {
        "rasactl=info"
    } else {
        "rasactl=error"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(debug)
        .init();
    guard
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let guard = init_tracing(cli.global.verbose, cli.global.debug);

    let result = match Settings::resolve(&cli.global) {
        Ok(settings) => ctl::run(cli.command, settings).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        // Flush pending log lines before exiting.
        drop(guard);
        std::process::exit(1);
    }
}
