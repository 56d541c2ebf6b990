//! Storage gateway abstraction over folder-structured object stores.
//!
//! The import pipeline only talks to storage through [`StorageGateway`].
//! Implementations:
//! - [`LocalGateway`]: directories under a root path
//! - [`DriveGateway`]: Google Drive v3 REST API
//! - [`RetryingGateway`]: bounded retry of transient failures around either

pub mod drive;
pub mod local;
pub mod retry;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub use drive::DriveGateway;
pub use local::LocalGateway;
pub use retry::{RetryPolicy, RetryingGateway};

/// Boxed future returned by gateway operations.
pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'a>>;

/// Maximum length of an uploaded file name.
const MAX_FILENAME_LEN: usize = 200;

// ─────────────────────────────────────────────────────────────────────────────
// SourceFile
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Folder,
}

/// Metadata of one entry in a storage folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Stable storage identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Folder the entry was listed in.
    pub folder: String,
    /// Provider modification time.
    pub modified_time: DateTime<Utc>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    pub kind: EntryKind,
}

impl SourceFile {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StorageGateway Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Capability interface over a remote folder/object store.
///
/// Error contract:
/// - `AppError::TransientStorage`: retryable
/// - `AppError::Permission`: needs operator action
/// - `AppError::NotFound`: the entry is gone (callers treat as already handled)
pub trait StorageGateway: Send + Sync {
    /// Lists the direct children of `folder`, files and sub-folders alike.
    fn list<'a>(&'a self, folder: &'a str) -> GatewayFuture<'a, Vec<SourceFile>>;

    /// Fetches the content of a listed file.
    fn read<'a>(&'a self, file: &'a SourceFile) -> GatewayFuture<'a, Vec<u8>>;

    /// Creates `name` in `folder`, or replaces the content of the entry with
    /// that name. Returns the entry's id.
    fn write<'a>(
        &'a self,
        folder: &'a str,
        name: &'a str,
        bytes: Vec<u8>,
    ) -> GatewayFuture<'a, String>;

    /// Moves entry `id` from folder `from` to folder `to`.
    fn move_entry<'a>(&'a self, id: &'a str, from: &'a str, to: &'a str)
        -> GatewayFuture<'a, ()>;

    /// Looks up a file by exact name in `folder`.
    fn find<'a>(&'a self, folder: &'a str, name: &'a str) -> GatewayFuture<'a, Option<SourceFile>> {
        Box::pin(async move {
            let entries = self.list(folder).await?;
            Ok(entries
                .into_iter()
                .find(|entry| entry.is_file() && entry.name == name))
        })
    }
}

/// Reads the file called `name` in `folder`, or `None` if there is none.
pub async fn read_named(
    gateway: &dyn StorageGateway,
    folder: &str,
    name: &str,
) -> Result<Option<Vec<u8>>, AppError> {
    let Some(file) = gateway.find(folder, name).await? else {
        return Ok(None);
    };
    match gateway.read(&file).await {
        Ok(bytes) => Ok(Some(bytes)),
        // Deleted between find and read
        Err(AppError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Makes a name safe for upload: reserved characters become `_`, the
/// result is trimmed and capped at 200 characters.
pub fn safe_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_replacement = false;
    for ch in name.trim().chars() {
        if matches!(ch, '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || ch.is_control() {
            // Runs of reserved characters collapse into one underscore
            if !last_was_replacement {
                out.push('_');
            }
            last_was_replacement = true;
        } else {
            out.push(ch);
            last_was_replacement = false;
        }
    }
    out.chars().take(MAX_FILENAME_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_filename_replaces_reserved_runs() {
        assert_eq!(safe_filename("  a/b\\c:d*?e  "), "a_b_c_d_e");
        assert_eq!(safe_filename("report<2024>|final\".csv"), "report_2024_final_.csv");
    }

    #[test]
    fn safe_filename_caps_length() {
        let long = "x".repeat(500);
        assert_eq!(safe_filename(&long).chars().count(), 200);
    }

    #[test]
    fn safe_filename_keeps_unicode() {
        assert_eq!(safe_filename("sản lượng tháng 1.csv"), "sản lượng tháng 1.csv");
    }
}
