//! Outcome of one import cycle. Reporting only; never read back as state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Disposition
// ─────────────────────────────────────────────────────────────────────────────

/// What happened to one file during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Merged, committed and moved to the archive.
    Imported,
    /// Merged and committed, but the archive move failed. Retried next cycle.
    ImportedArchivePending,
    /// Already imported earlier; only the pending archive move ran.
    Archived,
    /// Unchanged since its last import.
    Skipped,
    /// Could not be read or parsed; stays in the inbox.
    Failed,
    /// Listed, then gone before it could be read.
    Vanished,
    /// Not reached because the cycle was cancelled.
    NotStarted,
}

impl Disposition {
    /// Converts the disposition to its string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::Imported => "imported",
            Disposition::ImportedArchivePending => "imported_archive_pending",
            Disposition::Archived => "archived",
            Disposition::Skipped => "skipped",
            Disposition::Failed => "failed",
            Disposition::Vanished => "vanished",
            Disposition::NotStarted => "not_started",
        }
    }

    /// Parses a stored disposition. Unknown strings map to `Failed`.
    pub fn from_str(s: &str) -> Self {
        match s {
            "imported" => Disposition::Imported,
            "imported_archive_pending" => Disposition::ImportedArchivePending,
            "archived" => Disposition::Archived,
            "skipped" => Disposition::Skipped,
            "vanished" => Disposition::Vanished,
            "not_started" => Disposition::NotStarted,
            _ => Disposition::Failed,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Per-file line of a cycle report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub id: String,
    pub name: String,
    pub disposition: Disposition,
    /// Rows contributed by this file in this cycle.
    pub rows: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Summary of one import cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportCycleResult {
    pub cycle_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub imported: u32,
    pub skipped: u32,
    pub failed: u32,
    pub archive_retried: u32,
    pub vanished: u32,
    pub rows_added: u64,
    pub rows_superseded: u64,
    pub total_rows: u64,
    pub total_columns: usize,
    pub cancelled: bool,
    pub files: Vec<FileOutcome>,
}

impl ImportCycleResult {
    pub(crate) fn new(cycle_id: String, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id,
            started_at,
            finished_at: started_at,
            imported: 0,
            skipped: 0,
            failed: 0,
            archive_retried: 0,
            vanished: 0,
            rows_added: 0,
            rows_superseded: 0,
            total_rows: 0,
            total_columns: 0,
            cancelled: false,
            files: Vec::new(),
        }
    }

    /// Records a file outcome and bumps the matching counter.
    pub(crate) fn record(&mut self, outcome: FileOutcome) {
        match outcome.disposition {
            Disposition::Imported | Disposition::ImportedArchivePending => self.imported += 1,
            Disposition::Archived => self.archive_retried += 1,
            Disposition::Skipped => self.skipped += 1,
            Disposition::Failed => self.failed += 1,
            Disposition::Vanished => self.vanished += 1,
            Disposition::NotStarted => {}
        }
        self.files.push(outcome);
    }

    /// Files still waiting for their archive move after this cycle.
    pub fn archive_pending(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.disposition == Disposition::ImportedArchivePending)
            .count()
    }

    /// Returns true when every discovered file reached a terminal, non-failed state.
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.failed == 0 && self.archive_pending() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(disposition: Disposition) -> FileOutcome {
        FileOutcome {
            id: "f".into(),
            name: "f.csv".into(),
            disposition,
            rows: 0,
            note: None,
        }
    }

    #[test]
    fn record_updates_counters() {
        let mut result = ImportCycleResult::new("c1".into(), Utc::now());
        result.record(outcome(Disposition::Imported));
        result.record(outcome(Disposition::ImportedArchivePending));
        result.record(outcome(Disposition::Skipped));
        result.record(outcome(Disposition::Archived));
        result.record(outcome(Disposition::Failed));
        result.record(outcome(Disposition::Vanished));
        result.record(outcome(Disposition::NotStarted));

        assert_eq!(result.imported, 2);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.archive_retried, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.vanished, 1);
        assert_eq!(result.files.len(), 7);
        assert_eq!(result.archive_pending(), 1);
        assert!(!result.is_clean());
    }

    #[test]
    fn disposition_string_round_trip() {
        for d in [
            Disposition::Imported,
            Disposition::ImportedArchivePending,
            Disposition::Archived,
            Disposition::Skipped,
            Disposition::Failed,
            Disposition::Vanished,
            Disposition::NotStarted,
        ] {
            assert_eq!(Disposition::from_str(d.as_str()), d);
        }
        assert_eq!(Disposition::from_str("bogus"), Disposition::Failed);
    }

    #[test]
    fn serializes_snake_case_and_omits_empty_note() {
        let json = serde_json::to_value(outcome(Disposition::ImportedArchivePending))
            .expect("serialize");
        assert_eq!(json["disposition"], "imported_archive_pending");
        assert!(json.get("note").is_none());
    }
}
