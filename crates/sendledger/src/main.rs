//! `sendledger` - quota-aware email campaign sender
//!
//! Run output goes to stdout; diagnostics go through `tracing` to stderr.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod cli;
mod commands;

use clap::Parser;
use sendledger_core::Error as CoreError;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands, exit_codes};

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sendledger=info,sendledger_core=info,sendledger_smtp=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let code = match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

async fn run(cli: &Cli) -> anyhow::Result<i32> {
    match &cli.command {
        Commands::Send(args) => commands::send::run(cli, args).await,
        Commands::Status(args) => commands::status::run(args),
        Commands::Pending(args) => commands::pending::run(args),
        Commands::Profiles => commands::profiles::run(cli),
    }
}

/// Exit code for a failed command: bad input is a configuration error, anything
/// that broke while reading ledgers, lists or the network is a runtime error.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.chain().find_map(|cause| cause.downcast_ref::<CoreError>()) {
        Some(CoreError::Toml(_) | CoreError::Config(_) | CoreError::Validation(_)) => {
            exit_codes::CONFIG_ERROR
        }
        _ => exit_codes::RUNTIME_ERROR,
    }
}
