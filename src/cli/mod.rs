//! Command-line interface.
//!
//! ## Commands
//!
//! - `inbox-import import` - run one import cycle
//! - `inbox-import upload <files..> [--import]` - copy local files into the inbox
//! - `inbox-import status` - show the manifest and committed dataset
//! - `inbox-import history [--limit N] [--cycle ID]` - list recorded cycles
//! - `inbox-import export <path>` - write the committed dataset to a file
//!
//! ## Exit status
//!
//! `0` on success, `1` when a command fails, `2` when an import cycle ran but
//! left failed, cancelled, or archive-pending files behind.

mod render;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use crate::commands;
use crate::config::{BackendKind, Config};
use crate::error::AppError;
use crate::observability::LogFormat;
use crate::state::AppState;

pub use render::print_error;

/// Incremental import of tabular inbox files into one merged dataset.
#[derive(Debug, Parser)]
#[command(name = "inbox-import")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "INBOX_IMPORT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Storage backend holding the zones.
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// Root directory of the local backend.
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Inbox zone identifier.
    #[arg(long, global = true)]
    pub inbox: Option<String>,

    /// Archive zone identifier.
    #[arg(long, global = true)]
    pub archive: Option<String>,

    /// Output zone identifier.
    #[arg(long, global = true)]
    pub output: Option<String>,

    /// Output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Log format (logs go to stderr).
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Loads the configuration file and environment, then applies the flags.
    pub fn load_config(&self) -> Result<Config, AppError> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply_overrides(&mut config);
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut Config) {
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(root) = &self.root {
            config.local.root = root.clone();
        }
        if let Some(inbox) = &self.inbox {
            config.zones.inbox = inbox.clone();
        }
        if let Some(archive) = &self.archive {
            config.zones.archive = archive.clone();
        }
        if let Some(output) = &self.output {
            config.zones.output = output.clone();
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one import cycle.
    Import,
    /// Copy local files into the inbox.
    Upload(UploadArgs),
    /// Show manifest entries and the committed dataset.
    Status,
    /// List recorded import cycles.
    History(HistoryArgs),
    /// Write the committed dataset to a local file.
    Export(ExportArgs),
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Files to upload.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Run an import cycle after uploading.
    #[arg(long)]
    pub import: bool,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Number of cycles to list.
    #[arg(long, short = 'n')]
    pub limit: Option<u32>,

    /// Show the per-file events of one cycle instead.
    #[arg(long)]
    pub cycle: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Destination file.
    pub path: PathBuf,
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
}

/// Runs `command` and prints its result to stdout.
pub async fn execute(
    command: Commands,
    state: &AppState,
    format: OutputFormat,
) -> Result<ExitCode, AppError> {
    match command {
        Commands::Import => {
            let result = commands::run_import(state).await?;
            render::print_cycle(&result, format)?;
            Ok(cycle_exit_code(result.is_clean()))
        }
        Commands::Upload(args) => {
            let uploaded = commands::upload_files(state, &args.files).await?;
            render::print_uploads(&uploaded, format)?;
            if !args.import {
                return Ok(ExitCode::SUCCESS);
            }
            let result = commands::run_import(state).await?;
            render::print_cycle(&result, format)?;
            Ok(cycle_exit_code(result.is_clean()))
        }
        Commands::Status => {
            let report = commands::get_status(state).await?;
            render::print_status(&report, format)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::History(args) => {
            match &args.cycle {
                Some(cycle_id) => {
                    let events = commands::cycle_events(state, cycle_id).await?;
                    render::print_events(cycle_id, &events, format)?;
                }
                None => {
                    let cycles = commands::list_history(state, args.limit).await?;
                    render::print_history(&cycles, format)?;
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Export(args) => {
            let result = commands::export_dataset(state, &args.path).await?;
            render::print_export(&result, format)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn cycle_exit_code(clean: bool) -> ExitCode {
    if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
