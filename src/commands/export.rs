//! Export of the committed dataset to a local file.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;
use crate::storage::ManifestStore;
use crate::streaming::{content_digest, write_atomic};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub path: String,
    pub rows: u64,
    pub columns: usize,
    pub bytes: u64,
    pub sha256: String,
}

/// Writes the last committed dataset to `dest`.
///
/// Rows a crashed cycle appended after its last commit are left out, the
/// same way the next import would roll them back. The output zone itself
/// is not modified.
pub async fn export_dataset(state: &AppState, dest: &Path) -> Result<ExportResult, AppError> {
    let settings = state.config.import_settings();
    let (_manifest, dataset) = ManifestStore::load(
        state.gateway.clone(),
        &settings.output,
        &settings.manifest_name,
        &settings.dataset_name,
    )
    .await?;

    let bytes = dataset.encode()?;
    let sha256 = content_digest(&bytes);
    let size = bytes.len() as u64;

    let target: PathBuf = dest.to_path_buf();
    let written = tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
        .await
        .map_err(|e| AppError::Internal(format!("Export task failed: {e}")))??;

    info!(
        "[EXPORT] {} rows to {} ({} bytes)",
        dataset.row_count(),
        written.display(),
        size
    );
    Ok(ExportResult {
        path: written.display().to_string(),
        rows: dataset.row_count(),
        columns: dataset.columns().len(),
        bytes: size,
        sha256,
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
    async fn export_matches_committed_dataset() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let state = state(&dir).await;
        fs::write(dir.path().join("zones/inbox/a.csv"), "id,v\n1,x\n2,y\n").expect("write");
        run_import(&state).await.expect("import");

        let dest = dir.path().join("out.csv");
        let result = export_dataset(&state, &dest).await.expect("export");

        assert_eq!(result.rows, 2);
        assert_eq!(result.columns, 2);
        let exported = fs::read(&dest).expect("read export");
        let merged = fs::read(dir.path().join("zones/extract/merged.csv")).expect("read merged");
        assert_eq!(exported, merged);
        assert_eq!(result.sha256, content_digest(&merged));
    }

    #[tokio::test]
    async fn export_of_fresh_zone_is_empty_and_leaves_zone_untouched() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let state = state(&dir).await;

        let result = export_dataset(&state, &dir.path().join("out.csv"))
            .await
            .expect("export");

        assert_eq!(result.rows, 0);
        assert!(fs::read_dir(dir.path().join("zones/extract"))
            .expect("read dir")
            .next()
            .is_none());
    }

    #[tokio::test]
    async fn corrupt_output_zone_refuses_export() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let state = state(&dir).await;
        fs::write(dir.path().join("zones/extract/merged.csv"), "id\n1\n").expect("write");

        assert!(matches!(
            export_dataset(&state, &dir.path().join("out.csv")).await,
            Err(AppError::ManifestCorrupt(_))
        ));
        assert!(!dir.path().join("out.csv").exists());
    }
}
