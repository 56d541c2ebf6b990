//! Conversion of one source file's bytes into a column-aligned table.
//!
//! Every supported format ends up as a [`NormalizedTable`]: an ordered,
//! trimmed, de-duplicated column list and rows padded to that width.
//! Parsing is synchronous; callers run it on the blocking pool.

mod delimited;
mod json;
mod spreadsheet;

use std::collections::HashSet;

use chrono::SecondsFormat;
use serde::Serialize;
use tracing::debug;

use crate::error::AppError;
use crate::gateway::SourceFile;
use crate::streaming::merge::union_schema;
use crate::validation::{detect_format, TableFormat};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Marker stored for a missing cell.
pub const EMPTY_CELL: &str = "";

/// Sheet a spreadsheet row came from.
pub const SOURCE_SHEET_COLUMN: &str = "__source_sheet";

/// Object key a JSON record array was found under.
pub const JSON_KEY_COLUMN: &str = "__json_key";

/// Display name of the file a row came from (provenance).
pub const SOURCE_FILE_COLUMN: &str = "__source_file";

/// Storage id of the file a row came from (provenance).
pub const SOURCE_ID_COLUMN: &str = "__source_id";

/// Modification time of the imported file version (provenance).
pub const MODIFIED_TIME_COLUMN: &str = "__modified_time";

// ─────────────────────────────────────────────────────────────────────────────
// NormalizedTable
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed rows of one source file. Every row has exactly `columns.len()` cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub format: TableFormat,
    /// Non-fatal observations (BOM stripped, empty sheets skipped, ...).
    pub notes: Vec<String>,
}

impl NormalizedTable {
    pub(crate) fn new(format: TableFormat) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            format,
            notes: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Unions another frame (e.g. a second sheet) into this table.
    pub(crate) fn append_frame(&mut self, columns: &[String], rows: Vec<Vec<String>>) {
        let (positions, _) = union_schema(&mut self.columns, &mut self.rows, columns);
        let width = self.columns.len();
        for row in rows {
            let mut aligned = vec![EMPTY_CELL.to_string(); width];
            for (cell, &pos) in row.into_iter().zip(positions.iter()) {
                aligned[pos] = cell;
            }
            self.rows.push(aligned);
        }
    }

    /// Sets `name` to `value` on every row, adding the column if needed.
    pub(crate) fn set_constant_column(&mut self, name: &str, value: &str) {
        let idx = match self.columns.iter().position(|c| c == name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(EMPTY_CELL.to_string());
                }
                self.columns.len() - 1
            }
        };
        for row in &mut self.rows {
            row[idx] = value.to_string();
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TableNormalizer
// ─────────────────────────────────────────────────────────────────────────────

/// Parses source files into [`NormalizedTable`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableNormalizer {
    provenance_columns: bool,
}

impl TableNormalizer {
    /// Creates a normalizer. With `provenance_columns`, every row gains
    /// `__source_file`, `__source_id`, and `__modified_time`.
    pub fn new(provenance_columns: bool) -> Self {
        Self { provenance_columns }
    }

    /// Parses `bytes` as the content of `file`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MalformedInput` for empty or unparseable content.
    pub fn normalize(&self, file: &SourceFile, bytes: &[u8]) -> Result<NormalizedTable, AppError> {
        if bytes.is_empty() {
            return Err(AppError::MalformedInput(format!("{} is empty", file.name)));
        }

        let format = detect_format(&file.name, file.mime_type.as_deref(), bytes);
        let mut table = match format {
            TableFormat::Delimited { delimiter } => delimited::parse(bytes, delimiter),
            TableFormat::Spreadsheet => spreadsheet::parse(bytes),
            TableFormat::Json => json::parse(bytes),
        }
        .map_err(|e| match e {
            AppError::MalformedInput(msg) => {
                AppError::MalformedInput(format!("{}: {}", file.name, msg))
            }
            other => other,
        })?;

        if self.provenance_columns {
            table.set_constant_column(SOURCE_FILE_COLUMN, &file.name);
            table.set_constant_column(SOURCE_ID_COLUMN, &file.id);
            table.set_constant_column(
                MODIFIED_TIME_COLUMN,
                &file.modified_time.to_rfc3339_opts(SecondsFormat::Secs, true),
            );
        }

        debug!(
            file = %file.name,
            format = ?table.format,
            rows = table.rows.len(),
            columns = table.columns.len(),
            "[NORMALIZE] Parsed source file"
        );

        Ok(table)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Header hygiene
// ─────────────────────────────────────────────────────────────────────────────

/// Trims header names, names blank ones `Unnamed: <index>`, and suffixes
/// duplicates with `.1`, `.2`, ...
pub fn clean_headers<I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for (idx, name) in raw.into_iter().enumerate() {
        let trimmed = name.trim();
        let base = if trimmed.is_empty() {
            format!("Unnamed: {}", idx)
        } else {
            trimmed.to_string()
        };

        let mut candidate = base.clone();
        let mut suffix = 1;
        while seen.contains(&candidate) {
            candidate = format!("{}.{}", base, suffix);
            suffix += 1;
        }
        seen.insert(candidate.clone());
        out.push(candidate);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::EntryKind;
    use chrono::{TimeZone, Utc};

    fn source(name: &str) -> SourceFile {
        SourceFile {
            id: format!("id-{}", name),
            name: name.to_string(),
            folder: "inbox".to_string(),
            modified_time: Utc.with_ymd_and_hms(2026, 1, 31, 8, 0, 0).unwrap(),
            mime_type: None,
            size: None,
            kind: EntryKind::File,
        }
    }

    #[test]
    fn clean_headers_trims_fills_and_dedups() {
        let cleaned = clean_headers(
            [" plant ", "", "kwh", "kwh", "kwh", "Unnamed: 1"]
                .iter()
                .map(|s| s.to_string()),
        );
        assert_eq!(
            cleaned,
            vec!["plant", "Unnamed: 1", "kwh", "kwh.1", "kwh.2", "Unnamed: 1.1"]
        );
    }

    #[test]
    fn header_names_are_case_sensitive() {
        let cleaned = clean_headers(["KWh", "kwh"].iter().map(|s| s.to_string()));
        assert_eq!(cleaned, vec!["KWh", "kwh"]);
    }

    #[test]
    fn empty_file_is_malformed() {
        let err = TableNormalizer::default()
            .normalize(&source("jan.csv"), b"")
            .unwrap_err();
        assert!(matches!(err, AppError::MalformedInput(msg) if msg.contains("jan.csv")));
    }

    #[test]
    fn normalizes_csv_by_extension() {
        let table = TableNormalizer::default()
            .normalize(&source("jan.csv"), b"plant,kwh\nA,10\nB,12\n")
            .expect("csv should parse");
        assert_eq!(table.columns, vec!["plant", "kwh"]);
        assert_eq!(table.rows, vec![vec!["A", "10"], vec!["B", "12"]]);
    }

    #[test]
    fn provenance_columns_are_appended() {
        let table = TableNormalizer::new(true)
            .normalize(&source("jan.csv"), b"plant\nA\n")
            .expect("csv should parse");
        assert_eq!(
            table.columns,
            vec!["plant", SOURCE_FILE_COLUMN, SOURCE_ID_COLUMN, MODIFIED_TIME_COLUMN]
        );
        assert_eq!(
            table.rows[0],
            vec!["A", "jan.csv", "id-jan.csv", "2026-01-31T08:00:00Z"]
        );
    }

    #[test]
    fn append_frame_unions_columns() {
        let mut table = NormalizedTable::new(TableFormat::Spreadsheet);
        table.append_frame(
            &["x".to_string(), "y".to_string()],
            vec![vec!["1".into(), "2".into()]],
        );
        table.append_frame(
            &["y".to_string(), "z".to_string()],
            vec![vec!["3".into(), "4".into()]],
        );

        assert_eq!(table.columns, vec!["x", "y", "z"]);
        assert_eq!(table.rows, vec![vec!["1", "2", ""], vec!["", "3", "4"]]);
    }

    #[test]
    fn set_constant_column_overwrites_existing() {
        let mut table = NormalizedTable::new(TableFormat::Json);
        table.append_frame(
            &["a".to_string(), JSON_KEY_COLUMN.to_string()],
            vec![vec!["1".into(), "stale".into()]],
        );
        table.set_constant_column(JSON_KEY_COLUMN, "records");
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.rows[0][1], "records");
    }
}
