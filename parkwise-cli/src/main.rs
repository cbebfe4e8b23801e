//! Operator command-line tool for parkwise: tariff checks, scanner reads and simulated
//! session flows.

mod cli;
mod commands;
mod config;

use std::io;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    let config = config::load(&cli.global.config)?;
    tracing::debug!(command = ?cli.command, "dispatching command");

    match cli.command {
        Command::Quote(args) => commands::quote(&cli.global, &config, &args),
        Command::Validate { file } => commands::validate(&file),
        Command::DefaultTariff => commands::default_tariff(),
        Command::Scan { kind } => commands::scan(&config, kind).await,
        Command::Simulate(args) => commands::simulate(&cli.global, &config, args).await,
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_err| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}
