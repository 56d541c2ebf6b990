//! Cycle history persistence for SQLite.
//!
//! Observability only: the import pipeline never consults this table when
//! deciding what to process.

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppError;
use crate::import::result::{Disposition, ImportCycleResult};
use crate::storage::database::Database;

// ─────────────────────────────────────────────────────────────────────────────
// CycleOutcome Enum
// ─────────────────────────────────────────────────────────────────────────────

/// How a recorded cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Completed,
    Cancelled,
    /// Stopped by a cycle-level error (permission, corrupt manifest, lease).
    Aborted,
}

impl CycleOutcome {
    /// Converts the outcome to its string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Completed => "completed",
            CycleOutcome::Cancelled => "cancelled",
            CycleOutcome::Aborted => "aborted",
        }
    }

    /// Parses a stored outcome. Unknown strings map to `Aborted`.
    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => CycleOutcome::Completed,
            "cancelled" => CycleOutcome::Cancelled,
            _ => CycleOutcome::Aborted,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// One row of `import_cycles`. Timestamps are unix milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRow {
    pub cycle_id: String,
    pub outcome: CycleOutcome,
    pub started_at: i64,
    pub finished_at: i64,
    pub imported: i64,
    pub skipped: i64,
    pub failed: i64,
    pub archive_retried: i64,
    pub vanished: i64,
    pub rows_added: i64,
    pub rows_superseded: i64,
    pub total_rows: i64,
    pub total_columns: i64,
    pub error_message: Option<String>,
}

/// One row of `import_file_events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEventRow {
    pub cycle_id: String,
    pub file_id: String,
    pub file_name: String,
    pub disposition: Disposition,
    pub rows: i64,
    pub note: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Stores a finished (completed or cancelled) cycle and its file outcomes.
pub async fn record_cycle(db: &Database, result: &ImportCycleResult) -> Result<(), AppError> {
    let db_path = db.db_path().clone();
    let result = result.clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = Database::open_connection(&db_path)?;

        let tx = conn
            .transaction()
            .map_err(|e| AppError::Internal(format!("Failed to start transaction: {e}")))?;

        let outcome = if result.cancelled {
            CycleOutcome::Cancelled
        } else {
            CycleOutcome::Completed
        };

        tx.execute(
            r#"
            INSERT INTO import_cycles (cycle_id, outcome, started_at, finished_at, imported, skipped, failed,
                archive_retried, vanished, rows_added, rows_superseded, total_rows, total_columns, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, NULL)
            "#,
            rusqlite::params![
                result.cycle_id,
                outcome.as_str(),
                result.started_at.timestamp_millis(),
                result.finished_at.timestamp_millis(),
                result.imported,
                result.skipped,
                result.failed,
                result.archive_retried,
                result.vanished,
                result.rows_added as i64,
                result.rows_superseded as i64,
                result.total_rows as i64,
                result.total_columns as i64,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to insert cycle: {e}")))?;

        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO import_file_events (cycle_id, file_id, file_name, disposition, rows, note)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                    "#,
                )
                .map_err(|e| AppError::Internal(format!("Failed to prepare insert: {e}")))?;

            for file in &result.files {
                stmt.execute(rusqlite::params![
                    result.cycle_id,
                    file.id,
                    file.name,
                    file.disposition.as_str(),
                    file.rows as i64,
                    file.note,
                ])
                .map_err(|e| AppError::Internal(format!("Failed to insert file event: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| AppError::Internal(format!("Failed to commit cycle: {e}")))?;

        Ok::<_, AppError>(())
    })
    .await
    .map_err(|e| AppError::Internal(format!("Record cycle task failed: {e}")))??;

    debug!("[HISTORY] Recorded cycle");
    Ok(())
}

/// Stores a cycle that was aborted before producing a result.
///
/// Only the operator presentation of the error is kept, so secrets in raw
/// error text never reach the database.
pub async fn record_aborted_cycle(
    db: &Database,
    cycle_id: &str,
    started_at: DateTime<Utc>,
    error: &AppError,
) -> Result<(), AppError> {
    let db_path = db.db_path().clone();
    let cycle_id = cycle_id.to_string();
    let presentation = error.to_presentation();
    let message = format!("{}: {}", presentation.title, presentation.message);
    let finished_at = Utc::now().timestamp_millis();

    tokio::task::spawn_blocking(move || {
        let conn = Database::open_connection(&db_path)?;

        conn.execute(
            r#"
            INSERT INTO import_cycles (cycle_id, outcome, started_at, finished_at, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            rusqlite::params![
                cycle_id,
                CycleOutcome::Aborted.as_str(),
                started_at.timestamp_millis(),
                finished_at,
                message,
            ],
        )
        .map_err(|e| AppError::Internal(format!("Failed to insert cycle: {e}")))?;

        Ok::<_, AppError>(())
    })
    .await
    .map_err(|e| AppError::Internal(format!("Record cycle task failed: {e}")))??;

    Ok(())
}

/// Lists the most recent cycles, newest first.
pub async fn list_cycles(db: &Database, limit: u32) -> Result<Vec<CycleRow>, AppError> {
    let db_path = db.db_path().clone();

    tokio::task::spawn_blocking(move || {
        let conn = Database::open_connection(&db_path)?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT cycle_id, outcome, started_at, finished_at, imported, skipped, failed, archive_retried,
                       vanished, rows_added, rows_superseded, total_rows, total_columns, error_message
                FROM import_cycles
                ORDER BY started_at DESC, rowid DESC
                LIMIT ?1
                "#,
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([limit], |row| {
                let outcome: String = row.get(1)?;
                Ok(CycleRow {
                    cycle_id: row.get(0)?,
                    outcome: CycleOutcome::from_str(&outcome),
                    started_at: row.get(2)?,
                    finished_at: row.get(3)?,
                    imported: row.get(4)?,
                    skipped: row.get(5)?,
                    failed: row.get(6)?,
                    archive_retried: row.get(7)?,
                    vanished: row.get(8)?,
                    rows_added: row.get(9)?,
                    rows_superseded: row.get(10)?,
                    total_rows: row.get(11)?,
                    total_columns: row.get(12)?,
                    error_message: row.get(13)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to query cycles: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect cycles: {e}")))?;

        Ok::<_, AppError>(rows)
    })
    .await
    .map_err(|e| AppError::Internal(format!("List cycles task failed: {e}")))?
}

/// Gets one cycle with its file events, or `None` if the id is unknown.
pub async fn get_cycle_events(
    db: &Database,
    cycle_id: &str,
) -> Result<Option<Vec<FileEventRow>>, AppError> {
    let db_path = db.db_path().clone();
    let cycle_id = cycle_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = Database::open_connection(&db_path)?;

        let exists = conn
            .query_row(
                "SELECT 1 FROM import_cycles WHERE cycle_id = ?1",
                [&cycle_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| AppError::Internal(format!("Failed to query cycle: {e}")))?;
        if exists.is_none() {
            return Ok(None);
        }

        let mut stmt = conn
            .prepare(
                r#"
                SELECT cycle_id, file_id, file_name, disposition, rows, note
                FROM import_file_events
                WHERE cycle_id = ?1
                ORDER BY id ASC
                "#,
            )
            .map_err(|e| AppError::Internal(format!("Failed to prepare query: {e}")))?;

        let events = stmt
            .query_map([&cycle_id], |row| {
                let disposition: String = row.get(3)?;
                Ok(FileEventRow {
                    cycle_id: row.get(0)?,
                    file_id: row.get(1)?,
                    file_name: row.get(2)?,
                    disposition: Disposition::from_str(&disposition),
                    rows: row.get(4)?,
                    note: row.get(5)?,
                })
            })
            .map_err(|e| AppError::Internal(format!("Failed to query file events: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Internal(format!("Failed to collect file events: {e}")))?;

        Ok::<_, AppError>(Some(events))
    })
    .await
    .map_err(|e| AppError::Internal(format!("Get cycle task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::result::FileOutcome;
    use chrono::TimeZone;
    use tempfile::TempDir;

    async fn setup_db() -> (TempDir, Database) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("history.db");
        let db = Database::init(db_path).await.expect("Failed to init database");
        (temp_dir, db)
    }

    fn sample_result(cycle_id: &str, minute: u32) -> ImportCycleResult {
        let started_at = Utc.with_ymd_and_hms(2026, 2, 1, 8, minute, 0).unwrap();
        let mut result = ImportCycleResult::new(cycle_id.to_string(), started_at);
        result.finished_at = started_at + chrono::Duration::seconds(3);
        result.record(FileOutcome {
            id: "jan.csv".into(),
            name: "jan.csv".into(),
            disposition: Disposition::Imported,
            rows: 2,
            note: None,
        });
        result.record(FileOutcome {
            id: "bad.csv".into(),
            name: "bad.csv".into(),
            disposition: Disposition::Failed,
            rows: 0,
            note: Some("line 3 has 4 fields, header has 2".into()),
        });
        result.rows_added = 2;
        result.total_rows = 2;
        result.total_columns = 2;
        result
    }

    #[tokio::test]
    async fn record_and_list_cycles_newest_first() {
        let (_dir, db) = setup_db().await;

        record_cycle(&db, &sample_result("c1", 0)).await.expect("record c1");
        record_cycle(&db, &sample_result("c2", 5)).await.expect("record c2");

        let cycles = list_cycles(&db, 10).await.expect("list");
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].cycle_id, "c2");
        assert_eq!(cycles[0].outcome, CycleOutcome::Completed);
        assert_eq!(cycles[0].imported, 1);
        assert_eq!(cycles[0].failed, 1);
        assert_eq!(cycles[0].rows_added, 2);
        assert_eq!(cycles[0].finished_at - cycles[0].started_at, 3000);

        let limited = list_cycles(&db, 1).await.expect("list");
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn file_events_preserve_order_and_notes() {
        let (_dir, db) = setup_db().await;
        record_cycle(&db, &sample_result("c1", 0)).await.expect("record");

        let events = get_cycle_events(&db, "c1")
            .await
            .expect("query")
            .expect("cycle exists");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].disposition, Disposition::Imported);
        assert_eq!(events[1].disposition, Disposition::Failed);
        assert_eq!(
            events[1].note.as_deref(),
            Some("line 3 has 4 fields, header has 2")
        );

        assert!(get_cycle_events(&db, "missing").await.expect("query").is_none());
    }

    #[tokio::test]
    async fn cancelled_cycles_are_marked() {
        let (_dir, db) = setup_db().await;
        let mut result = sample_result("c1", 0);
        result.cancelled = true;
        record_cycle(&db, &result).await.expect("record");

        let cycles = list_cycles(&db, 10).await.expect("list");
        assert_eq!(cycles[0].outcome, CycleOutcome::Cancelled);
    }

    #[tokio::test]
    async fn aborted_cycle_stores_presentation_not_raw_error() {
        let (_dir, db) = setup_db().await;
        let err = AppError::TransientStorage("Authorization: Bearer ya29.secret".into());

        record_aborted_cycle(&db, "c9", Utc::now(), &err)
            .await
            .expect("record");

        let cycles = list_cycles(&db, 10).await.expect("list");
        assert_eq!(cycles[0].outcome, CycleOutcome::Aborted);
        let message = cycles[0].error_message.clone().expect("message stored");
        assert!(!message.contains("ya29"));
        assert!(message.starts_with("Storage Temporarily Unavailable"));
    }
}
