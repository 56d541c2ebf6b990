//! `inbox-import` binary.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use inbox_import::cli::{self, print_error};
use inbox_import::observability::init_logging;
use inbox_import::{AppState, Cli};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.log_format);
    let format = cli.format;

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            print_error(&e, format);
            return Ok(ExitCode::FAILURE);
        }
    };

    let command = cli.command;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    let outcome = runtime.block_on(async move {
        let state = AppState::init(config).await?;

        let cancel = state.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("[CLI] Interrupt received, stopping after the current file");
                cancel.cancel();
            }
        });

        cli::execute(command, &state, format).await
    });

    match outcome {
        Ok(code) => Ok(code),
        Err(e) => {
            print_error(&e, format);
            Ok(ExitCode::FAILURE)
        }
    }
}
