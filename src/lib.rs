//! # inbox-import
//!
//! Incremental import of tabular files dropped into an inbox zone into one
//! merged dataset in an output zone. Imported files move to an archive
//! zone; a manifest in the output zone records what was imported so every
//! cycle only picks up new or changed files.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod import;
pub mod normalize;
pub mod observability;
pub mod state;
pub mod storage;
pub mod streaming;
pub mod validation;

pub use cli::{Cli, Commands, OutputFormat};
pub use config::Config;
pub use error::AppError;
pub use state::AppState;
