//! Persisted ledger of imported source files, kept in the output zone next
//! to the merged dataset.
//!
//! The manifest doubles as the commit marker for the dataset. A new dataset
//! is first written to a staging artifact (`<dataset>.next`), then the
//! manifest is written with its digest, then the staged bytes are promoted
//! over the dataset. The manifest write is the commit point: on load,
//! whichever of the dataset and the staging artifact matches the committed
//! digest wins, so a crash at any step leaves the previous or the new commit
//! intact regardless of how the two datasets differ.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::gateway::{read_named, StorageGateway};
use crate::streaming::{content_digest, AccumulatedDataset};

/// On-disk format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Suffix of the write-ahead copy of the dataset.
pub const STAGING_SUFFIX: &str = ".next";

/// Name of the write-ahead copy of `dataset_name`.
pub fn staging_name(dataset_name: &str) -> String {
    format!("{}{}", dataset_name, STAGING_SUFFIX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Import status of a manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Imported,
    Failed,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryStatus::Imported => "imported",
            EntryStatus::Failed => "failed",
        }
    }
}

/// Ledger record for one source file, keyed by its storage id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    /// Modification time of the last successfully merged version.
    /// `None` when the file has only ever failed.
    pub modified_time: Option<DateTime<Utc>>,
    pub status: EntryStatus,
    pub rows_contributed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ManifestEntry {
    /// True if a file with `modified_time` must be (re)imported.
    pub fn needs_import(&self, modified_time: DateTime<Utc>) -> bool {
        match (self.status, self.modified_time) {
            (EntryStatus::Failed, _) | (_, None) => true,
            (EntryStatus::Imported, Some(stored)) => modified_time > stored,
        }
    }
}

/// Shape and digest of the last committed dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetCommit {
    pub rows: u64,
    pub columns: Vec<String>,
    pub sha256: String,
}

impl DatasetCommit {
    fn describe(dataset: &AccumulatedDataset, bytes: &[u8]) -> Self {
        Self {
            rows: dataset.row_count(),
            columns: dataset.columns().to_vec(),
            sha256: content_digest(bytes),
        }
    }

    /// True if `dataset` is exactly the committed one.
    fn matches(&self, dataset: &AccumulatedDataset) -> Result<bool, AppError> {
        if dataset.row_count() != self.rows || dataset.columns() != self.columns.as_slice() {
            return Ok(false);
        }
        Ok(content_digest(&dataset.encode()?) == self.sha256)
    }
}

/// The whole manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub processed: BTreeMap<String, ManifestEntry>,
    #[serde(default)]
    pub dataset: DatasetCommit,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            processed: BTreeMap::new(),
            dataset: DatasetCommit {
                sha256: content_digest(&[]),
                ..DatasetCommit::default()
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ManifestStore
// ─────────────────────────────────────────────────────────────────────────────

/// Read-all / mutate / write-all manifest with an explicit commit.
pub struct ManifestStore {
    gateway: Arc<dyn StorageGateway>,
    folder: String,
    manifest_name: String,
    dataset_name: String,
    manifest: Manifest,
    dirty: bool,
    /// The stored dataset differs from the committed one: it holds rows past
    /// the commit marker, or the committed version is still staged.
    restore_pending: bool,
}

impl std::fmt::Debug for ManifestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestStore")
            .field("folder", &self.folder)
            .field("manifest_name", &self.manifest_name)
            .field("entries", &self.manifest.processed.len())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl ManifestStore {
    /// Reads the manifest and dataset from `folder` and reconciles them.
    ///
    /// Performs no writes; call [`ManifestStore::ensure_consistent`] before
    /// mutating anything.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ManifestCorrupt` when the manifest is unparseable,
    /// the dataset exists without a manifest, or the dataset cannot be
    /// reconciled with the commit marker.
    pub async fn load(
        gateway: Arc<dyn StorageGateway>,
        folder: &str,
        manifest_name: &str,
        dataset_name: &str,
    ) -> Result<(Self, AccumulatedDataset), AppError> {
        let manifest_bytes = read_named(gateway.as_ref(), folder, manifest_name)
            .await
            .map_err(|e| e.in_zone("output"))?;
        let dataset_bytes = read_named(gateway.as_ref(), folder, dataset_name)
            .await
            .map_err(|e| e.in_zone("output"))?;

        let mut store = Self {
            gateway,
            folder: folder.to_string(),
            manifest_name: manifest_name.to_string(),
            dataset_name: dataset_name.to_string(),
            manifest: Manifest::default(),
            dirty: false,
            restore_pending: false,
        };

        let Some(manifest_bytes) = manifest_bytes else {
            if dataset_bytes.is_some() {
                return Err(AppError::ManifestCorrupt(format!(
                    "{} exists without {}",
                    dataset_name, manifest_name
                )));
            }
            info!("[MANIFEST] No manifest in {}, starting fresh", folder);
            store.dirty = true;
            return Ok((store, AccumulatedDataset::new()));
        };

        store.manifest = parse_manifest(&manifest_bytes, manifest_name)?;
        let commit = &store.manifest.dataset;

        let mut dataset = match dataset_bytes {
            Some(bytes) => AccumulatedDataset::decode(&bytes)
                .map_err(|e| AppError::ManifestCorrupt(format!("{}: {}", dataset_name, e)))?,
            None => AccumulatedDataset::new(),
        };

        if !commit.matches(&dataset)? {
            match read_staged(store.gateway.as_ref(), folder, dataset_name, commit).await? {
                Some(staged) => {
                    info!("[MANIFEST] Committed dataset found in {}", staging_name(dataset_name));
                    dataset = staged;
                    store.restore_pending = true;
                }
                None => store.restore_pending = reconcile(&mut dataset, commit)?,
            }
        }

        debug!(
            entries = store.manifest.processed.len(),
            rows = dataset.row_count(),
            "[MANIFEST] Loaded"
        );
        Ok((store, dataset))
    }

    /// Brings storage in line with the loaded state: rewrites a rolled-back
    /// or still staged dataset and commits the initial manifest of a fresh
    /// output zone.
    pub async fn ensure_consistent(&mut self, dataset: &AccumulatedDataset) -> Result<(), AppError> {
        if self.restore_pending {
            let bytes = dataset.encode()?;
            self.gateway
                .write(&self.folder, &self.dataset_name, bytes)
                .await
                .map_err(|e| e.in_zone("output"))?;
            self.restore_pending = false;
            info!("[MANIFEST] Restored {} to the last commit", self.dataset_name);
        }
        self.commit().await?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ManifestEntry> {
        self.manifest.processed.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &ManifestEntry)> {
        self.manifest.processed.iter()
    }

    pub fn len(&self) -> usize {
        self.manifest.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.processed.is_empty()
    }

    pub fn dataset_commit(&self) -> &DatasetCommit {
        &self.manifest.dataset
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Inserts or replaces an entry. Returns false, and stays clean, when the
    /// stored entry is already identical.
    pub fn upsert(&mut self, id: &str, entry: ManifestEntry) -> bool {
        if self.manifest.processed.get(id) == Some(&entry) {
            return false;
        }
        self.manifest.processed.insert(id.to_string(), entry);
        self.dirty = true;
        true
    }

    /// Marks `id` as failed with `message`, keeping its last imported
    /// timestamp and row count.
    pub fn annotate_failure(&mut self, id: &str, name: &str, message: &str) -> bool {
        let entry = match self.manifest.processed.get(id) {
            Some(existing) => ManifestEntry {
                status: EntryStatus::Failed,
                last_error: Some(message.to_string()),
                ..existing.clone()
            },
            None => ManifestEntry {
                name: name.to_string(),
                modified_time: None,
                status: EntryStatus::Failed,
                rows_contributed: 0,
                mime_type: None,
                imported_at: None,
                archived: false,
                last_error: Some(message.to_string()),
            },
        };
        self.upsert(id, entry)
    }

    /// Records the result of an archive move for an imported entry.
    pub fn mark_archived(&mut self, id: &str, archived: bool, error: Option<String>) -> bool {
        let Some(existing) = self.manifest.processed.get(id) else {
            return false;
        };
        let entry = ManifestEntry {
            archived,
            last_error: error,
            ..existing.clone()
        };
        self.upsert(id, entry)
    }

    /// Writes the manifest if anything changed. Returns whether a write happened.
    pub async fn commit(&mut self) -> Result<bool, AppError> {
        if !self.dirty {
            return Ok(false);
        }
        let bytes = serde_json::to_vec_pretty(&self.manifest)
            .map_err(|e| AppError::Internal(format!("Failed to encode manifest: {}", e)))?;
        self.gateway
            .write(&self.folder, &self.manifest_name, bytes)
            .await
            .map_err(|e| e.in_zone("output"))?;
        self.dirty = false;
        debug!(entries = self.manifest.processed.len(), "[MANIFEST] Committed");
        Ok(true)
    }

    /// Commits one file's contribution: stages `dataset`, writes the manifest
    /// with `entry` and the new commit marker, then promotes the staged bytes.
    ///
    /// On failure the in-memory manifest is restored, so the caller can keep
    /// its previous dataset and carry on. The stored dataset is untouched
    /// until the manifest is committed; a failed promotion is only logged
    /// because the next load resolves the committed bytes from staging.
    pub async fn persist(
        &mut self,
        dataset: &AccumulatedDataset,
        id: &str,
        entry: ManifestEntry,
    ) -> Result<(), AppError> {
        let snapshot = self.manifest.clone();
        let was_dirty = self.dirty;

        let result = self.persist_inner(dataset, id, entry).await;
        if result.is_err() {
            self.manifest = snapshot;
            self.dirty = was_dirty;
        }
        result
    }

    async fn persist_inner(
        &mut self,
        dataset: &AccumulatedDataset,
        id: &str,
        entry: ManifestEntry,
    ) -> Result<(), AppError> {
        let bytes = dataset.encode()?;
        let commit = DatasetCommit::describe(dataset, &bytes);
        let staging = staging_name(&self.dataset_name);

        self.gateway
            .write(&self.folder, &staging, bytes.clone())
            .await
            .map_err(|e| e.in_zone("output"))?;

        self.manifest.dataset = commit;
        self.manifest.processed.insert(id.to_string(), entry);
        self.dirty = true;
        self.commit().await?;

        if let Err(e) = self
            .gateway
            .write(&self.folder, &self.dataset_name, bytes)
            .await
        {
            warn!(
                "[MANIFEST] Committed dataset left in {}, promotion failed: {}",
                staging, e
            );
        }
        Ok(())
    }
}

fn parse_manifest(bytes: &[u8], name: &str) -> Result<Manifest, AppError> {
    let manifest: Manifest = serde_json::from_slice(bytes)
        .map_err(|e| AppError::ManifestCorrupt(format!("{} is not valid: {}", name, e)))?;
    if manifest.version != MANIFEST_VERSION {
        return Err(AppError::ManifestCorrupt(format!(
            "{} has unsupported version {}",
            name, manifest.version
        )));
    }
    Ok(manifest)
}

/// Returns the staged dataset if it is exactly the committed one.
async fn read_staged(
    gateway: &dyn StorageGateway,
    folder: &str,
    dataset_name: &str,
    commit: &DatasetCommit,
) -> Result<Option<AccumulatedDataset>, AppError> {
    let name = staging_name(dataset_name);
    let Some(bytes) = read_named(gateway, folder, &name)
        .await
        .map_err(|e| e.in_zone("output"))?
    else {
        return Ok(None);
    };
    // A torn or stale staging copy is not evidence of anything
    let Ok(staged) = AccumulatedDataset::decode(&bytes) else {
        return Ok(None);
    };
    Ok(commit.matches(&staged)?.then_some(staged))
}

/// Rolls `dataset` back to `commit`. Returns true if anything was dropped.
fn reconcile(dataset: &mut AccumulatedDataset, commit: &DatasetCommit) -> Result<bool, AppError> {
    let stored_rows = dataset.row_count();
    if stored_rows < commit.rows {
        return Err(AppError::ManifestCorrupt(format!(
            "dataset has {} rows, manifest committed {}",
            stored_rows, commit.rows
        )));
    }

    let rolled_back = stored_rows > commit.rows || dataset.columns() != commit.columns.as_slice();
    if rolled_back {
        dataset.truncate(commit.rows as usize);
        dataset
            .project(&commit.columns)
            .map_err(|e| AppError::ManifestCorrupt(e.to_string()))?;
        warn!(
            "[MANIFEST] Rolled back {} uncommitted rows",
            stored_rows - commit.rows
        );
    }

    let digest = content_digest(&dataset.encode()?);
    if digest != commit.sha256 {
        return Err(AppError::ManifestCorrupt(
            "dataset digest does not match the manifest".into(),
        ));
    }

    Ok(rolled_back)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::LocalGateway;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    const OUT: &str = "extract";

    async fn setup() -> (TempDir, Arc<dyn StorageGateway>) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let gateway = LocalGateway::new(dir.path());
        gateway.ensure_folder(OUT).await.expect("mkdir");
        (dir, Arc::new(gateway))
    }

    async fn load(gateway: &Arc<dyn StorageGateway>) -> Result<(ManifestStore, AccumulatedDataset), AppError> {
        ManifestStore::load(gateway.clone(), OUT, "manifest.json", "merged.csv").await
    }

    fn imported(name: &str, day: u32, rows: u64) -> ManifestEntry {
        ManifestEntry {
            name: name.into(),
            modified_time: Some(Utc.with_ymd_and_hms(2026, 1, day, 8, 0, 0).unwrap()),
            status: EntryStatus::Imported,
            rows_contributed: rows,
            mime_type: None,
            imported_at: None,
            archived: false,
            last_error: None,
        }
    }

    fn dataset(columns: &[&str], rows: &[&[&str]]) -> AccumulatedDataset {
        AccumulatedDataset {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[tokio::test]
    async fn fresh_zone_commits_empty_manifest() {
        let (dir, gateway) = setup().await;

        let (mut store, data) = load(&gateway).await.expect("load");
        assert!(store.is_empty());
        assert!(store.is_dirty());
        assert_eq!(data.row_count(), 0);

        store.ensure_consistent(&data).await.expect("commit");

        let raw = fs::read_to_string(dir.path().join("extract/manifest.json")).expect("read");
        let parsed: Manifest = serde_json::from_str(&raw).expect("parse");
        assert_eq!(parsed, Manifest::default());
        assert!(!dir.path().join("extract/merged.csv").exists());

        // Reload of an empty committed zone is clean
        let (store, _) = load(&gateway).await.expect("reload");
        assert!(!store.is_dirty());
    }

    #[tokio::test]
    async fn persist_then_reload() {
        let (_dir, gateway) = setup().await;
        let (mut store, data) = load(&gateway).await.expect("load");
        store.ensure_consistent(&data).await.expect("init");

        let merged = dataset(&["plant", "kwh"], &[&["A", "1"], &["B", "2"]]);
        store
            .persist(&merged, "jan.csv", imported("jan.csv", 31, 2))
            .await
            .expect("persist");
        assert!(!store.is_dirty());

        let (store, reloaded) = load(&gateway).await.expect("reload");
        assert_eq!(reloaded, merged);
        assert_eq!(store.get("jan.csv"), Some(&imported("jan.csv", 31, 2)));
        assert_eq!(store.dataset_commit().rows, 2);
        assert_eq!(store.dataset_commit().columns, vec!["plant", "kwh"]);
    }

    #[tokio::test]
    async fn identical_upsert_is_a_no_op() {
        let (_dir, gateway) = setup().await;
        let (mut store, data) = load(&gateway).await.expect("load");
        store.ensure_consistent(&data).await.expect("init");

        assert!(store.upsert("jan.csv", imported("jan.csv", 31, 2)));
        assert!(store.commit().await.expect("commit"));

        assert!(!store.upsert("jan.csv", imported("jan.csv", 31, 2)));
        assert!(!store.commit().await.expect("commit"));
    }

    #[tokio::test]
    async fn annotate_failure_keeps_timestamp_and_rows() {
        let (_dir, gateway) = setup().await;
        let (mut store, _) = load(&gateway).await.expect("load");

        store.upsert("jan.csv", imported("jan.csv", 31, 2));
        assert!(store.annotate_failure("jan.csv", "jan.csv", "HTTP 503"));

        let entry = store.get("jan.csv").expect("entry");
        assert_eq!(entry.status, EntryStatus::Failed);
        assert_eq!(entry.rows_contributed, 2);
        assert_eq!(entry.modified_time, imported("jan.csv", 31, 2).modified_time);
        assert_eq!(entry.last_error.as_deref(), Some("HTTP 503"));

        // Same failure again changes nothing
        assert!(!store.annotate_failure("jan.csv", "jan.csv", "HTTP 503"));

        assert!(store.annotate_failure("bad.csv", "bad.csv", "not a table"));
        let fresh = store.get("bad.csv").expect("entry");
        assert_eq!(fresh.modified_time, None);
        assert!(fresh.needs_import(Utc::now()));
    }

    #[test]
    fn needs_import_compares_timestamps() {
        let entry = imported("jan.csv", 15, 2);
        let stored = entry.modified_time.expect("time");
        assert!(!entry.needs_import(stored));
        assert!(!entry.needs_import(stored - chrono::Duration::seconds(1)));
        assert!(entry.needs_import(stored + chrono::Duration::seconds(1)));
    }

    #[tokio::test]
    async fn uncommitted_rows_are_rolled_back() {
        let (dir, gateway) = setup().await;
        let (mut store, data) = load(&gateway).await.expect("load");
        store.ensure_consistent(&data).await.expect("init");

        let committed = dataset(&["plant", "kwh"], &[&["A", "1"]]);
        store
            .persist(&committed, "jan.csv", imported("jan.csv", 31, 1))
            .await
            .expect("persist");

        // A dataset written in place by an older build, without a staged copy
        fs::remove_file(dir.path().join("extract/merged.csv.next")).expect("rm staging");
        fs::write(
            dir.path().join("extract/merged.csv"),
            "plant,kwh,inverter\nA,1,\nB,2,x\n",
        )
        .expect("write");

        let (mut store, reloaded) = load(&gateway).await.expect("reload");
        assert_eq!(reloaded, committed);

        store.ensure_consistent(&reloaded).await.expect("repair");
        assert_eq!(
            fs::read_to_string(dir.path().join("extract/merged.csv")).expect("read"),
            "plant,kwh\nA,1\n"
        );
    }

    #[tokio::test]
    async fn missing_committed_rows_are_corruption() {
        let (dir, gateway) = setup().await;
        let (mut store, data) = load(&gateway).await.expect("load");
        store.ensure_consistent(&data).await.expect("init");
        store
            .persist(
                &dataset(&["a"], &[&["1"], &["2"]]),
                "f",
                imported("f", 1, 2),
            )
            .await
            .expect("persist");

        fs::remove_file(dir.path().join("extract/merged.csv.next")).expect("rm staging");
        fs::write(dir.path().join("extract/merged.csv"), "a\n1\n").expect("write");
        assert!(matches!(load(&gateway).await, Err(AppError::ManifestCorrupt(_))));
    }

    #[tokio::test]
    async fn edited_cells_fail_the_digest() {
        let (dir, gateway) = setup().await;
        let (mut store, data) = load(&gateway).await.expect("load");
        store.ensure_consistent(&data).await.expect("init");
        store
            .persist(&dataset(&["a"], &[&["1"]]), "f", imported("f", 1, 1))
            .await
            .expect("persist");

        fs::remove_file(dir.path().join("extract/merged.csv.next")).expect("rm staging");
        fs::write(dir.path().join("extract/merged.csv"), "a\n9\n").expect("write");
        let err = load(&gateway).await.unwrap_err();
        assert!(matches!(err, AppError::ManifestCorrupt(msg) if msg.contains("digest")));
    }

    #[tokio::test]
    async fn persist_stages_then_promotes() {
        let (dir, gateway) = setup().await;
        let (mut store, data) = load(&gateway).await.expect("load");
        store.ensure_consistent(&data).await.expect("init");

        store
            .persist(&dataset(&["a"], &[&["1"]]), "f", imported("f", 1, 1))
            .await
            .expect("persist");

        let main = fs::read(dir.path().join("extract/merged.csv")).expect("read");
        let staged = fs::read(dir.path().join("extract/merged.csv.next")).expect("read staging");
        assert_eq!(main, b"a\n1\n");
        assert_eq!(main, staged);
        assert_eq!(store.dataset_commit().sha256, content_digest(&main));
    }

    #[tokio::test]
    async fn unpromoted_commit_is_resolved_from_staging() {
        let (dir, gateway) = setup().await;
        let (mut store, data) = load(&gateway).await.expect("load");
        store.ensure_consistent(&data).await.expect("init");
        store
            .persist(&dataset(&["a", "src"], &[&["1", "f"], &["2", "f"]]), "f", imported("f", 1, 2))
            .await
            .expect("persist");
        let previous = fs::read(dir.path().join("extract/merged.csv")).expect("read");

        // A superseding commit whose promotion never happened
        let shorter = dataset(&["a", "src"], &[&["3", "f"]]);
        store
            .persist(&shorter, "f", imported("f", 2, 1))
            .await
            .expect("persist");
        fs::write(dir.path().join("extract/merged.csv"), &previous).expect("write");

        let (mut store, reloaded) = load(&gateway).await.expect("reload");
        assert_eq!(reloaded, shorter);
        assert_eq!(store.get("f").map(|e| e.rows_contributed), Some(1));

        store.ensure_consistent(&reloaded).await.expect("repair");
        assert_eq!(
            fs::read_to_string(dir.path().join("extract/merged.csv")).expect("read"),
            "a,src\n3,f\n"
        );
    }

    #[tokio::test]
    async fn uncommitted_staging_is_ignored() {
        let (dir, gateway) = setup().await;
        let (mut store, data) = load(&gateway).await.expect("load");
        store.ensure_consistent(&data).await.expect("init");
        let committed = dataset(&["a"], &[&["1"], &["2"]]);
        store
            .persist(&committed, "f", imported("f", 1, 2))
            .await
            .expect("persist");

        // Staged by a commit that never reached the manifest
        fs::write(dir.path().join("extract/merged.csv.next"), "a\n3\n").expect("write");

        let (store, reloaded) = load(&gateway).await.expect("reload");
        assert_eq!(reloaded, committed);
        assert_eq!(store.dataset_commit().rows, 2);
    }

    #[tokio::test]
    async fn dataset_without_manifest_is_corruption() {
        let (dir, gateway) = setup().await;
        fs::remove_file(dir.path().join("extract/merged.csv.next")).expect("rm staging");
        fs::write(dir.path().join("extract/merged.csv"), "a\n1\n").expect("write");
        assert!(matches!(load(&gateway).await, Err(AppError::ManifestCorrupt(_))));
    }

    #[tokio::test]
    async fn unparseable_manifest_is_corruption() {
        let (dir, gateway) = setup().await;
        fs::write(dir.path().join("extract/manifest.json"), "{not json").expect("write");
        assert!(matches!(load(&gateway).await, Err(AppError::ManifestCorrupt(_))));

        fs::write(
            dir.path().join("extract/manifest.json"),
            r#"{"version": 7, "processed": {}}"#,
        )
        .expect("write");
        let err = load(&gateway).await.unwrap_err();
        assert!(matches!(err, AppError::ManifestCorrupt(msg) if msg.contains("version 7")));
    }

    #[tokio::test]
    async fn failed_persist_restores_in_memory_state() {
        let (dir, gateway) = setup().await;
        let (mut store, data) = load(&gateway).await.expect("load");
        store.ensure_consistent(&data).await.expect("init");

        // A directory in the manifest's place makes the commit fail
        fs::remove_file(dir.path().join("extract/manifest.json")).expect("rm");
        fs::create_dir(dir.path().join("extract/manifest.json")).expect("mkdir");

        let result = store
            .persist(&dataset(&["a"], &[&["1"]]), "f", imported("f", 1, 1))
            .await;
        assert!(result.is_err());
        assert!(store.get("f").is_none());
        assert_eq!(store.dataset_commit().rows, 0);
        assert!(!store.is_dirty());
    }
}
