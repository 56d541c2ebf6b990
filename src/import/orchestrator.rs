//! One import cycle: discover, classify, normalize, merge, persist, archive.
//!
//! Per file: `DISCOVERED -> SKIPPED | NORMALIZING -> MERGING -> PERSISTING
//! -> ARCHIVING -> DONE`, or `FAILED`. Persisting is the only all-or-nothing
//! step. A file that reaches it always gets its archive move attempted, and
//! a failed move is retried alone on the next cycle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::lease::ImportLease;
use super::result::{Disposition, FileOutcome, ImportCycleResult};
use crate::error::AppError;
use crate::gateway::{SourceFile, StorageGateway};
use crate::normalize::{NormalizedTable, TableNormalizer};
use crate::observability::cycle_span;
use crate::storage::{EntryStatus, ManifestEntry, ManifestStore};
use crate::streaming::{AccumulatedDataset, MergeEngine};

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Zone ids and artifact names for a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSettings {
    pub inbox: String,
    pub archive: String,
    pub output: String,
    pub dataset_name: String,
    pub manifest_name: String,
    pub lease_name: String,
    /// Files fetched and parsed ahead of the one being merged.
    pub fetch_concurrency: usize,
    pub lease_ttl: Duration,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            inbox: "inbox".into(),
            archive: "archive".into(),
            output: "extract".into(),
            dataset_name: "merged.csv".into(),
            manifest_name: "manifest.json".into(),
            lease_name: "import.lock".into(),
            fetch_concurrency: 4,
            lease_ttl: Duration::from_secs(600),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Discovered files sorted into what this cycle does with them.
#[derive(Debug, Default)]
struct CyclePlan {
    /// New, changed, or previously failed inbox files.
    candidates: Vec<SourceFile>,
    /// Imported and unchanged, but still in the inbox.
    archive_pending: Vec<SourceFile>,
    /// Imported, unchanged, and already archived.
    skipped: Vec<SourceFile>,
}

fn classify(manifest: &ManifestStore, inbox: Vec<SourceFile>, archive: Vec<SourceFile>) -> CyclePlan {
    let mut plan = CyclePlan::default();
    let in_inbox: HashSet<String> = inbox.iter().map(|f| f.id.clone()).collect();

    for file in inbox {
        if !file.is_file() {
            debug!(name = %file.name, "[IMPORT] Ignoring folder in inbox");
            continue;
        }
        match manifest.get(&file.id) {
            Some(entry) if !entry.needs_import(file.modified_time) => plan.archive_pending.push(file),
            _ => plan.candidates.push(file),
        }
    }

    // An id still in the inbox is reported by its inbox copy
    for file in archive
        .into_iter()
        .filter(|f| f.is_file() && !in_inbox.contains(&f.id))
    {
        let known = manifest.get(&file.id).map_or(false, |entry| {
            entry.status == EntryStatus::Imported && !entry.needs_import(file.modified_time)
        });
        if known {
            plan.skipped.push(file);
        }
    }

    let by_time = |a: &SourceFile, b: &SourceFile| {
        a.modified_time
            .cmp(&b.modified_time)
            .then_with(|| a.id.cmp(&b.id))
    };
    plan.candidates.sort_by(by_time);
    plan.archive_pending.sort_by(by_time);
    plan.skipped.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    plan
}

enum ArchiveStep {
    Moved,
    /// The entry left the inbox on its own.
    AlreadyGone,
    Pending(String),
}

/// Reads and parses one file. Parsing runs on the blocking pool.
async fn fetch_table(
    gateway: Arc<dyn StorageGateway>,
    normalizer: TableNormalizer,
    file: SourceFile,
) -> Result<NormalizedTable, AppError> {
    let bytes = gateway.read(&file).await?;
    tokio::task::spawn_blocking(move || normalizer.normalize(&file, &bytes))
        .await
        .map_err(|e| AppError::Internal(format!("Normalize task failed: {}", e)))?
}

fn outcome(file: &SourceFile, disposition: Disposition, rows: u64, note: Option<String>) -> FileOutcome {
    FileOutcome {
        id: file.id.clone(),
        name: file.name.clone(),
        disposition,
        rows,
        note,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ImportOrchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Drives import cycles against one inbox/archive/output triple.
pub struct ImportOrchestrator {
    gateway: Arc<dyn StorageGateway>,
    settings: ImportSettings,
    normalizer: TableNormalizer,
    merge: MergeEngine,
    cancel: CancellationToken,
}

/// Mutable state of a running cycle.
struct Cycle {
    manifest: ManifestStore,
    dataset: AccumulatedDataset,
    result: ImportCycleResult,
    /// (id, name, message) annotated into the manifest at the end.
    failures: Vec<(String, String, String)>,
}

impl ImportOrchestrator {
    pub fn new(
        gateway: Arc<dyn StorageGateway>,
        settings: ImportSettings,
        normalizer: TableNormalizer,
        merge: MergeEngine,
    ) -> Self {
        Self {
            gateway,
            settings,
            normalizer,
            merge,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `token` for cancellation. It is observed only between files.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn settings(&self) -> &ImportSettings {
        &self.settings
    }

    /// Runs one cycle under a fresh cycle id.
    pub async fn run_cycle(&self) -> Result<ImportCycleResult, AppError> {
        self.run_cycle_as(&Uuid::new_v4().to_string()).await
    }

    /// Runs one cycle.
    ///
    /// # Errors
    ///
    /// Cycle-level failures abort with an error: permission errors in any
    /// zone, a corrupt manifest, a held lease, listing failures, and
    /// cancellation before the cycle started. Per-file failures are reported
    /// in the result instead.
    pub async fn run_cycle_as(&self, cycle_id: &str) -> Result<ImportCycleResult, AppError> {
        self.run_cycle_inner(cycle_id)
            .instrument(cycle_span(cycle_id))
            .await
    }

    async fn run_cycle_inner(&self, cycle_id: &str) -> Result<ImportCycleResult, AppError> {
        if self.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let started_at = Utc::now();
        info!("[IMPORT] Cycle {} started", cycle_id);

        let mut lease = ImportLease::acquire(
            self.gateway.clone(),
            &self.settings.output,
            &self.settings.lease_name,
            self.settings.lease_ttl,
            "import",
        )
        .await?;

        let locked = self.run_locked(cycle_id, started_at, &mut lease).await;

        if let Err(e) = lease.release().await {
            warn!("[IMPORT] Failed to release lease: {}", e);
        }

        let result = match locked {
            Ok(result) => result,
            Err(e) => {
                warn!("[IMPORT] Cycle {} aborted: {}", cycle_id, e);
                return Err(e);
            }
        };

        info!(
            "[IMPORT] Cycle {} finished: {} imported, {} skipped, {} failed, {} archive retries, {} rows total{}",
            cycle_id,
            result.imported,
            result.skipped,
            result.failed,
            result.archive_retried,
            result.total_rows,
            if result.cancelled { " (cancelled)" } else { "" }
        );
        Ok(result)
    }

    async fn run_locked(
        &self,
        cycle_id: &str,
        started_at: chrono::DateTime<Utc>,
        lease: &mut ImportLease,
    ) -> Result<ImportCycleResult, AppError> {
        let settings = &self.settings;

        let (mut manifest, dataset) = ManifestStore::load(
            self.gateway.clone(),
            &settings.output,
            &settings.manifest_name,
            &settings.dataset_name,
        )
        .await?;
        manifest.ensure_consistent(&dataset).await?;

        let inbox = self
            .gateway
            .list(&settings.inbox)
            .await
            .map_err(|e| e.in_zone("inbox"))?;
        let archive = self
            .gateway
            .list(&settings.archive)
            .await
            .map_err(|e| e.in_zone("archive"))?;

        let plan = classify(&manifest, inbox, archive);
        info!(
            "[IMPORT] {} to import, {} awaiting archive, {} unchanged",
            plan.candidates.len(),
            plan.archive_pending.len(),
            plan.skipped.len()
        );

        let mut cycle = Cycle {
            manifest,
            dataset,
            result: ImportCycleResult::new(cycle_id.to_string(), started_at),
            failures: Vec::new(),
        };

        for file in &plan.skipped {
            // The move happened but its annotation was never committed
            if cycle.manifest.mark_archived(&file.id, true, None) {
                debug!(name = %file.name, "[IMPORT] Found in the archive, marked archived");
            }
            cycle.result.record(outcome(file, Disposition::Skipped, 0, None));
        }

        self.retry_archive_moves(&mut cycle, plan.archive_pending, lease)
            .await?;
        self.import_candidates(&mut cycle, plan.candidates, lease)
            .await?;

        for (id, name, message) in &cycle.failures {
            cycle.manifest.annotate_failure(id, name, message);
        }
        match cycle.manifest.commit().await {
            Ok(_) => {}
            Err(e) if e.is_fatal_for_cycle() => return Err(e),
            // Annotations are informational; the imports are already committed
            Err(e) => warn!("[IMPORT] Failed to record cycle annotations: {}", e),
        }

        let mut result = cycle.result;
        result.total_rows = cycle.dataset.row_count();
        result.total_columns = cycle.dataset.columns().len();
        result.finished_at = Utc::now();
        Ok(result)
    }

    async fn retry_archive_moves(
        &self,
        cycle: &mut Cycle,
        pending: Vec<SourceFile>,
        lease: &mut ImportLease,
    ) -> Result<(), AppError> {
        for file in pending {
            if self.cancel.is_cancelled() {
                cycle.result.cancelled = true;
                cycle.result.record(outcome(&file, Disposition::NotStarted, 0, None));
                continue;
            }
            lease.keep_alive().await?;

            let (disposition, note) = match self.archive(&mut cycle.manifest, &file).await? {
                ArchiveStep::Moved => (Disposition::Archived, None),
                ArchiveStep::AlreadyGone => (
                    Disposition::Archived,
                    Some("already gone from the inbox".to_string()),
                ),
                ArchiveStep::Pending(message) => (Disposition::ImportedArchivePending, Some(message)),
            };
            cycle.result.record(outcome(&file, disposition, 0, note));
        }
        Ok(())
    }

    async fn import_candidates(
        &self,
        cycle: &mut Cycle,
        candidates: Vec<SourceFile>,
        lease: &mut ImportLease,
    ) -> Result<(), AppError> {
        let gateway = self.gateway.clone();
        let normalizer = self.normalizer;
        let fetches = futures_util::stream::iter(candidates.clone())
            .map(move |file| fetch_table(gateway.clone(), normalizer, file))
            .buffered(self.settings.fetch_concurrency.max(1));
        let mut fetches = std::pin::pin!(fetches);

        for (idx, file) in candidates.iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("[IMPORT] Cancelled with {} files not started", candidates.len() - idx);
                cycle.result.cancelled = true;
                for rest in &candidates[idx..] {
                    cycle.result.record(outcome(rest, Disposition::NotStarted, 0, None));
                }
                break;
            }
            lease.keep_alive().await?;

            let Some(fetched) = fetches.next().await else {
                break;
            };

            match fetched {
                Ok(table) => self.import_file(cycle, file, table, lease).await?,
                Err(AppError::NotFound(_)) => {
                    info!("[IMPORT] {} vanished before it could be read", file.name);
                    cycle.result.record(outcome(
                        file,
                        Disposition::Vanished,
                        0,
                        Some("removed from the inbox before it could be read".into()),
                    ));
                }
                Err(e) if e.is_fatal_for_cycle() => return Err(e.in_zone("inbox")),
                Err(e) => self.record_failure(cycle, file, &e),
            }
        }
        Ok(())
    }

    /// MERGING -> PERSISTING -> ARCHIVING for one parsed file.
    async fn import_file(
        &self,
        cycle: &mut Cycle,
        file: &SourceFile,
        table: NormalizedTable,
        lease: &mut ImportLease,
    ) -> Result<(), AppError> {
        let rows = table.row_count() as u64;
        for note in &table.notes {
            debug!(name = %file.name, "[IMPORT] {}", note);
        }

        // Stored timestamps never move backwards
        let previous = cycle
            .manifest
            .get(&file.id)
            .and_then(|entry| entry.modified_time);
        let modified_time = previous.map_or(file.modified_time, |p| p.max(file.modified_time));

        let (merged, report) = self.merge.merge(cycle.dataset.clone(), table, &file.id);
        let entry = ManifestEntry {
            name: file.name.clone(),
            modified_time: Some(modified_time),
            status: EntryStatus::Imported,
            rows_contributed: rows,
            mime_type: file.mime_type.clone(),
            imported_at: Some(Utc::now()),
            archived: false,
            last_error: None,
        };

        // Parsing may outlast the lease; never persist without it
        lease.keep_alive().await?;
        match cycle.manifest.persist(&merged, &file.id, entry).await {
            Ok(()) => {}
            Err(e) if e.is_fatal_for_cycle() => return Err(e),
            Err(e) => {
                self.record_failure(cycle, file, &e);
                return Ok(());
            }
        }

        cycle.dataset = merged;
        cycle.result.rows_added += report.rows_appended;
        cycle.result.rows_superseded += report.rows_superseded;
        if !report.columns_added.is_empty() {
            info!(
                "[IMPORT] {} added columns: {}",
                file.name,
                report.columns_added.join(", ")
            );
        }
        info!("[IMPORT] Imported {} ({} rows)", file.name, rows);

        let (disposition, note) = match self.archive(&mut cycle.manifest, file).await? {
            ArchiveStep::Moved => (Disposition::Imported, None),
            ArchiveStep::AlreadyGone => (
                Disposition::Imported,
                Some("left the inbox before it was archived".to_string()),
            ),
            ArchiveStep::Pending(message) => (Disposition::ImportedArchivePending, Some(message)),
        };
        cycle.result.record(outcome(file, disposition, rows, note));
        Ok(())
    }

    async fn archive(&self, manifest: &mut ManifestStore, file: &SourceFile) -> Result<ArchiveStep, AppError> {
        let settings = &self.settings;
        match self
            .gateway
            .move_entry(&file.id, &settings.inbox, &settings.archive)
            .await
        {
            Ok(()) => {
                manifest.mark_archived(&file.id, true, None);
                debug!(name = %file.name, "[IMPORT] Archived");
                Ok(ArchiveStep::Moved)
            }
            Err(AppError::NotFound(_)) => {
                manifest.mark_archived(&file.id, true, None);
                info!("[IMPORT] {} was no longer in the inbox", file.name);
                Ok(ArchiveStep::AlreadyGone)
            }
            Err(e) if e.is_fatal_for_cycle() => Err(e.in_zone("archive")),
            Err(e) => {
                let message = e.to_string();
                warn!("[IMPORT] Archive of {} pending: {}", file.name, message);
                manifest.mark_archived(&file.id, false, Some(message.clone()));
                Ok(ArchiveStep::Pending(message))
            }
        }
    }

    fn record_failure(&self, cycle: &mut Cycle, file: &SourceFile, error: &AppError) {
        let message = error.to_string();
        warn!("[IMPORT] {} failed: {}", file.name, message);
        cycle
            .failures
            .push((file.id.clone(), file.name.clone(), message.clone()));
        cycle
            .result
            .record(outcome(file, Disposition::Failed, 0, Some(message)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{EntryKind, LocalGateway};
    use chrono::{DateTime, TimeZone};
    use tempfile::TempDir;

    fn listed(id: &str, folder: &str, day: u32) -> SourceFile {
        SourceFile {
            id: id.into(),
            name: id.into(),
            folder: folder.into(),
            modified_time: at(day),
            mime_type: None,
            size: None,
            kind: EntryKind::File,
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, 8, 0, 0).unwrap()
    }

    fn entry(day: u32, status: EntryStatus) -> ManifestEntry {
        ManifestEntry {
            name: "x".into(),
            modified_time: Some(at(day)),
            status,
            rows_contributed: 1,
            mime_type: None,
            imported_at: None,
            archived: true,
            last_error: None,
        }
    }

    async fn manifest_with(entries: &[(&str, ManifestEntry)]) -> (TempDir, ManifestStore) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let gateway = LocalGateway::new(dir.path());
        gateway.ensure_folder("extract").await.expect("mkdir");
        let (mut store, _) = ManifestStore::load(Arc::new(gateway), "extract", "manifest.json", "merged.csv")
            .await
            .expect("load");
        for (id, e) in entries {
            store.upsert(id, e.clone());
        }
        (dir, store)
    }

    #[tokio::test]
    async fn classify_sorts_inbox_files() {
        let (_dir, manifest) = manifest_with(&[
            ("same.csv", entry(10, EntryStatus::Imported)),
            ("changed.csv", entry(10, EntryStatus::Imported)),
            ("broken.csv", entry(10, EntryStatus::Failed)),
        ])
        .await;

        let mut folder = listed("sub", "inbox", 1);
        folder.kind = EntryKind::Folder;
        let inbox = vec![
            listed("new.csv", "inbox", 12),
            listed("same.csv", "inbox", 10),
            listed("changed.csv", "inbox", 11),
            listed("broken.csv", "inbox", 10),
            folder,
        ];

        let plan = classify(&manifest, inbox, Vec::new());
        let ids = |files: &[SourceFile]| files.iter().map(|f| f.id.clone()).collect::<Vec<_>>();

        assert_eq!(ids(&plan.candidates), vec!["broken.csv", "changed.csv", "new.csv"]);
        assert_eq!(ids(&plan.archive_pending), vec!["same.csv"]);
        assert!(plan.skipped.is_empty());
    }

    #[tokio::test]
    async fn classify_orders_ties_by_id() {
        let (_dir, manifest) = manifest_with(&[]).await;
        let inbox = vec![
            listed("b.csv", "inbox", 5),
            listed("a.csv", "inbox", 5),
            listed("c.csv", "inbox", 4),
        ];

        let plan = classify(&manifest, inbox, Vec::new());
        let ids: Vec<_> = plan.candidates.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["c.csv", "a.csv", "b.csv"]);
    }

    #[tokio::test]
    async fn archive_copy_of_inbox_id_is_not_skipped() {
        let (_dir, manifest) = manifest_with(&[("plants.csv", entry(10, EntryStatus::Imported))]).await;

        let plan = classify(
            &manifest,
            vec![listed("plants.csv", "inbox", 11)],
            vec![listed("plants.csv", "archive", 10)],
        );
        assert_eq!(plan.candidates.len(), 1);
        assert!(plan.skipped.is_empty());
    }

    #[tokio::test]
    async fn archived_known_files_are_skipped() {
        let (_dir, manifest) = manifest_with(&[
            ("jan.csv", entry(10, EntryStatus::Imported)),
            ("failed.csv", entry(10, EntryStatus::Failed)),
        ])
        .await;
        let archive = vec![
            listed("jan.csv", "archive", 10),
            listed("failed.csv", "archive", 10),
            listed("stranger.csv", "archive", 10),
        ];

        let plan = classify(&manifest, Vec::new(), archive);
        assert!(plan.candidates.is_empty());
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].id, "jan.csv");
    }

    #[test]
    fn default_settings_use_standard_names() {
        let settings = ImportSettings::default();
        assert_eq!(settings.output, "extract");
        assert_eq!(settings.dataset_name, "merged.csv");
        assert_eq!(settings.manifest_name, "manifest.json");
        assert_eq!(settings.lease_name, "import.lock");
    }
}
