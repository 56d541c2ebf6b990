//! Read-only view of the output zone.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::import::{ImportLease, LeaseInfo};
use crate::state::AppState;
use crate::storage::{EntryStatus, ManifestEntry, ManifestStore};

/// Manifest entry returned to the operator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    pub id: String,
    pub name: String,
    pub status: EntryStatus,
    pub modified_time: Option<DateTime<Utc>>,
    pub rows_contributed: u64,
    pub archived: bool,
    pub last_error: Option<String>,
}

impl StatusEntry {
    fn from_entry(id: &str, entry: &ManifestEntry) -> Self {
        Self {
            id: id.to_string(),
            name: entry.name.clone(),
            status: entry.status,
            modified_time: entry.modified_time,
            rows_contributed: entry.rows_contributed,
            archived: entry.archived,
            last_error: entry.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub backend: String,
    pub inbox: String,
    pub archive: String,
    pub output: String,
    /// Files currently waiting in the inbox.
    pub inbox_files: usize,
    pub dataset_rows: u64,
    pub dataset_columns: Vec<String>,
    pub dataset_sha256: String,
    pub entries: Vec<StatusEntry>,
    /// Live lease of a running import, if any.
    pub lease: Option<LeaseInfo>,
}

/// Loads the manifest, dataset commit, and lease without writing anything.
///
/// # Errors
///
/// Fails like the start of an import cycle would: a corrupt manifest or a
/// zone the identity cannot access.
pub async fn get_status(state: &AppState) -> Result<StatusReport, AppError> {
    let settings = state.config.import_settings();

    let (manifest, _dataset) = ManifestStore::load(
        state.gateway.clone(),
        &settings.output,
        &settings.manifest_name,
        &settings.dataset_name,
    )
    .await?;

    let inbox_files = state
        .gateway
        .list(&settings.inbox)
        .await
        .map_err(|e| e.in_zone("inbox"))?
        .iter()
        .filter(|f| f.is_file())
        .count();

    let lease = ImportLease::inspect(
        state.gateway.as_ref(),
        &settings.output,
        &settings.lease_name,
    )
    .await?;

    let commit = manifest.dataset_commit();
    Ok(StatusReport {
        backend: state.config.backend.as_str().to_string(),
        inbox: settings.inbox.clone(),
        archive: settings.archive.clone(),
        output: settings.output.clone(),
        inbox_files,
        dataset_rows: commit.rows,
        dataset_columns: commit.columns.clone(),
        dataset_sha256: commit.sha256.clone(),
        entries: manifest
            .entries()
            .map(|(id, entry)| StatusEntry::from_entry(id, entry))
            .collect(),
        lease,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::run_import;
    use crate::config::Config;
    use std::fs;
    use tempfile::TempDir;

    async fn state(dir: &TempDir) -> AppState {
        let mut config = Config::default();
        config.local.root = dir.path().join("zones");
        config.history_db = None;
        AppState::init(config).await.expect("init")
    }

    #[tokio::test]
    async fn fresh_zone_reports_empty_and_writes_nothing() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let state = state(&dir).await;
        fs::write(dir.path().join("zones/inbox/a.csv"), "id\n1\n").expect("write");

        let report = get_status(&state).await.expect("status");

        assert_eq!(report.inbox_files, 1);
        assert_eq!(report.dataset_rows, 0);
        assert!(report.entries.is_empty());
        assert!(report.lease.is_none());
        assert!(!dir.path().join("zones/extract/manifest.json").exists());
    }

    #[tokio::test]
    async fn reports_imported_entries() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let state = state(&dir).await;
        fs::write(dir.path().join("zones/inbox/a.csv"), "id,v\n1,x\n2,y\n").expect("write");
        run_import(&state).await.expect("import");

        let report = get_status(&state).await.expect("status");

        assert_eq!(report.inbox_files, 0);
        assert_eq!(report.dataset_rows, 2);
        assert_eq!(report.dataset_columns, vec!["id", "v"]);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].name, "a.csv");
        assert_eq!(report.entries[0].status, EntryStatus::Imported);
        assert!(report.entries[0].archived);
        // The lease was released at the end of the cycle
        assert!(report.lease.is_none());
    }
}
