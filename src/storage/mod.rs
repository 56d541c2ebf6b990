//! Storage module: the manifest ledger in the output zone and the local
//! SQLite cycle history.

mod database;
pub mod history;
pub mod manifest;

pub use database::Database;
pub use manifest::{DatasetCommit, EntryStatus, Manifest, ManifestEntry, ManifestStore};
