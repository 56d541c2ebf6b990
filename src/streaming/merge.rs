//! Append-only merge of normalized tables into the accumulated dataset.
//!
//! Key properties:
//! - Schema is the union of every column seen, in first-seen order
//! - Existing rows gain new columns with the empty marker
//! - New rows are appended after all existing rows, in source order
//! - No content deduplication; row identity is file of origin + position

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::normalize::{NormalizedTable, EMPTY_CELL, SOURCE_ID_COLUMN};
use crate::streaming::dataset::AccumulatedDataset;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// What happens to earlier rows when a changed file is imported again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReimportPolicy {
    /// Keep the earlier version's rows and append the new version's rows.
    #[default]
    Append,
    /// Remove rows whose `__source_id` matches the file before appending.
    /// Requires provenance columns.
    Supersede,
}

impl ReimportPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReimportPolicy::Append => "append",
            ReimportPolicy::Supersede => "supersede",
        }
    }
}

impl FromStr for ReimportPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(ReimportPolicy::Append),
            "supersede" => Ok(ReimportPolicy::Supersede),
            other => Err(AppError::Config(format!(
                "unknown re-import policy '{}' (expected append or supersede)",
                other
            ))),
        }
    }
}

/// Outcome of merging one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub rows_appended: u64,
    pub rows_superseded: u64,
    pub columns_added: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// MergeEngine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine {
    policy: ReimportPolicy,
}

impl MergeEngine {
    pub fn new(policy: ReimportPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> ReimportPolicy {
        self.policy
    }

    /// Appends `table` to `accumulated`, reconciling the schema.
    ///
    /// Takes the dataset by value so the caller keeps its previous snapshot
    /// untouched until the result is committed.
    pub fn merge(
        &self,
        mut accumulated: AccumulatedDataset,
        table: NormalizedTable,
        source_id: &str,
    ) -> (AccumulatedDataset, MergeReport) {
        let mut report = MergeReport::default();

        if self.policy == ReimportPolicy::Supersede {
            if let Some(idx) = accumulated.columns.iter().position(|c| c == SOURCE_ID_COLUMN) {
                let before = accumulated.rows.len();
                accumulated.rows.retain(|row| row[idx] != source_id);
                report.rows_superseded = (before - accumulated.rows.len()) as u64;
            }
        }

        let (positions, added) =
            union_schema(&mut accumulated.columns, &mut accumulated.rows, &table.columns);
        report.columns_added = added;

        let width = accumulated.columns.len();
        for row in table.rows {
            let mut aligned = vec![EMPTY_CELL.to_string(); width];
            for (cell, &pos) in row.into_iter().zip(positions.iter()) {
                aligned[pos] = cell;
            }
            accumulated.rows.push(aligned);
            report.rows_appended += 1;
        }

        (accumulated, report)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Schema union
// ─────────────────────────────────────────────────────────────────────────────

/// Extends `columns` with every name from `incoming` not yet present and
/// backfills `rows` with the empty marker.
///
/// Returns the position of each incoming column in the extended schema,
/// and the names that were added.
pub(crate) fn union_schema(
    columns: &mut Vec<String>,
    rows: &mut [Vec<String>],
    incoming: &[String],
) -> (Vec<usize>, Vec<String>) {
    let mut index: HashMap<String, usize> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.clone(), i))
        .collect();

    let mut positions = Vec::with_capacity(incoming.len());
    let mut added = Vec::new();
    for name in incoming {
        let pos = match index.get(name) {
            Some(&pos) => pos,
            None => {
                columns.push(name.clone());
                index.insert(name.clone(), columns.len() - 1);
                added.push(name.clone());
                columns.len() - 1
            }
        };
        positions.push(pos);
    }

    if !added.is_empty() {
        let width = columns.len();
        for row in rows.iter_mut() {
            row.resize(width, EMPTY_CELL.to_string());
        }
    }

    (positions, added)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::TableFormat;

    fn table(columns: &[&str], rows: &[&[&str]]) -> NormalizedTable {
        NormalizedTable {
            columns: columns.iter().map(|s| s.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
            format: TableFormat::Delimited { delimiter: b',' },
            notes: Vec::new(),
        }
    }

    #[test]
    fn schema_union_backfills_both_sides() {
        let engine = MergeEngine::default();
        let (ds, first) = engine.merge(
            AccumulatedDataset::new(),
            table(&["x", "y"], &[&["1", "2"]]),
            "a",
        );
        assert_eq!(first.columns_added, vec!["x", "y"]);

        let (ds, second) = engine.merge(ds, table(&["y", "z"], &[&["3", "4"]]), "b");
        assert_eq!(second.columns_added, vec!["z"]);
        assert_eq!(second.rows_appended, 1);

        assert_eq!(ds.columns(), &["x", "y", "z"]);
        assert_eq!(ds.cell(0, "z"), Some(""));
        assert_eq!(ds.cell(1, "x"), Some(""));
        assert_eq!(ds.cell(1, "y"), Some("3"));
    }

    #[test]
    fn append_keeps_existing_rows_first() {
        let engine = MergeEngine::default();
        let (ds, _) = engine.merge(
            AccumulatedDataset::new(),
            table(&["plant"], &[&["A"], &["B"]]),
            "jan",
        );
        let (ds, _) = engine.merge(ds, table(&["plant"], &[&["C"]]), "feb");
        let plants: Vec<&str> = ds.rows().iter().map(|r| r[0].as_str()).collect();
        assert_eq!(plants, vec!["A", "B", "C"]);
    }

    #[test]
    fn append_policy_keeps_earlier_version_rows() {
        let engine = MergeEngine::new(ReimportPolicy::Append);
        let (ds, _) = engine.merge(
            AccumulatedDataset::new(),
            table(&["v", SOURCE_ID_COLUMN], &[&["old", "f1"]]),
            "f1",
        );
        let (ds, report) = engine.merge(
            ds,
            table(&["v", SOURCE_ID_COLUMN], &[&["new", "f1"]]),
            "f1",
        );
        assert_eq!(report.rows_superseded, 0);
        assert_eq!(ds.row_count(), 2);
    }

    #[test]
    fn supersede_policy_replaces_rows_of_same_source() {
        let engine = MergeEngine::new(ReimportPolicy::Supersede);
        let (ds, _) = engine.merge(
            AccumulatedDataset::new(),
            table(
                &["v", SOURCE_ID_COLUMN],
                &[&["old1", "f1"], &["keep", "f2"], &["old2", "f1"]],
            ),
            "f1",
        );
        let (ds, report) = engine.merge(
            ds,
            table(&["v", SOURCE_ID_COLUMN], &[&["new", "f1"]]),
            "f1",
        );

        assert_eq!(report.rows_superseded, 2);
        assert_eq!(report.rows_appended, 1);
        let values: Vec<&str> = ds.rows().iter().map(|r| r[0].as_str()).collect();
        assert_eq!(values, vec!["keep", "new"]);
    }

    #[test]
    fn zero_row_table_still_extends_schema() {
        let engine = MergeEngine::default();
        let (ds, _) = engine.merge(
            AccumulatedDataset::new(),
            table(&["a"], &[&["1"]]),
            "x",
        );
        let (ds, report) = engine.merge(ds, table(&["b"], &[]), "y");
        assert_eq!(report.rows_appended, 0);
        assert_eq!(ds.columns(), &["a", "b"]);
        assert_eq!(ds.rows(), &[vec!["1".to_string(), String::new()]]);
    }

    #[test]
    fn policy_parsing() {
        assert_eq!(
            "Supersede".parse::<ReimportPolicy>().expect("parse"),
            ReimportPolicy::Supersede
        );
        assert_eq!(
            " append ".parse::<ReimportPolicy>().expect("parse"),
            ReimportPolicy::Append
        );
        assert!(matches!(
            "replace".parse::<ReimportPolicy>(),
            Err(AppError::Config(_))
        ));
    }
}
