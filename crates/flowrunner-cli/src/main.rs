//! Flowrunner CLI - launch EMR clusters and run playbooks of steps on them.
//!
//! This is the entry point for the `flowrunner` binary.

mod args;
mod commands;

use std::process::ExitCode;

use clap::Parser;
use flowrunner_lock::LockError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use args::{Cli, LogLevel};

/// Exit code for a lock already held by someone else.
const LOCK_HELD_EXIT_CODE: u8 = 17;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level);

    match commands::execute(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn init_tracing(level: LogLevel) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.directive().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn exit_code(err: &anyhow::Error) -> u8 {
    let held = err
        .chain()
        .any(|cause| cause.downcast_ref::<LockError>().is_some_and(LockError::is_held));
    if held {
        LOCK_HELD_EXIT_CODE
    } else {
        1
    }
}
