//! Cycle history queries.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::import::Disposition;
use crate::state::AppState;
use crate::storage::history::{self, CycleOutcome, CycleRow, FileEventRow};

/// Default number of cycles listed.
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

// ─────────────────────────────────────────────────────────────────────────────
// DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Recorded cycle returned to the operator.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub cycle_id: String,
    pub outcome: CycleOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
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

impl From<CycleRow> for CycleSummary {
    fn from(row: CycleRow) -> Self {
        Self {
            cycle_id: row.cycle_id,
            outcome: row.outcome,
            started_at: from_millis(row.started_at),
            finished_at: from_millis(row.finished_at),
            imported: row.imported,
            skipped: row.skipped,
            failed: row.failed,
            archive_retried: row.archive_retried,
            vanished: row.vanished,
            rows_added: row.rows_added,
            rows_superseded: row.rows_superseded,
            total_rows: row.total_rows,
            total_columns: row.total_columns,
            error_message: row.error_message,
        }
    }
}

/// Per-file event of a recorded cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEventInfo {
    pub file_id: String,
    pub file_name: String,
    pub disposition: Disposition,
    pub rows: i64,
    pub note: Option<String>,
}

impl From<FileEventRow> for FileEventInfo {
    fn from(row: FileEventRow) -> Self {
        Self {
            file_id: row.file_id,
            file_name: row.file_name,
            disposition: row.disposition,
            rows: row.rows,
            note: row.note,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

/// Lists recorded cycles, most recent first.
pub async fn list_history(
    state: &AppState,
    limit: Option<u32>,
) -> Result<Vec<CycleSummary>, AppError> {
    let db = state.history()?;
    let rows = history::list_cycles(db, limit.unwrap_or(DEFAULT_HISTORY_LIMIT)).await?;
    Ok(rows.into_iter().map(CycleSummary::from).collect())
}

/// Returns the per-file events of one cycle.
///
/// # Errors
///
/// `AppError::NotFound` if no cycle with that id was recorded.
pub async fn cycle_events(
    state: &AppState,
    cycle_id: &str,
) -> Result<Vec<FileEventInfo>, AppError> {
    let db = state.history()?;
    let events = history::get_cycle_events(db, cycle_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Cycle {} not in history", cycle_id)))?;
    Ok(events.into_iter().map(FileEventInfo::from).collect())
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}
