//! Workbook parsing via calamine. Every non-empty sheet contributes rows.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};

use super::{clean_headers, NormalizedTable, EMPTY_CELL, SOURCE_SHEET_COLUMN};
use crate::error::AppError;
use crate::validation::TableFormat;

pub(super) fn parse(bytes: &[u8]) -> Result<NormalizedTable, AppError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| AppError::MalformedInput(format!("unreadable workbook: {}", e)))?;

    let mut table = NormalizedTable::new(TableFormat::Spreadsheet);
    let mut sheets_read = 0usize;

    for sheet in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| AppError::MalformedInput(format!("sheet '{}': {}", sheet, e)))?;

        let mut rows = range
            .rows()
            .filter(|row| row.iter().any(|cell| !matches!(cell, Data::Empty)));

        let Some(header) = rows.next() else {
            table.notes.push(format!("skipped empty sheet '{}'", sheet));
            continue;
        };

        let mut columns = clean_headers(header.iter().map(cell_to_string));
        // An existing marker column is overwritten with the sheet name
        let marker = match columns.iter().position(|c| c == SOURCE_SHEET_COLUMN) {
            Some(idx) => idx,
            None => {
                columns.push(SOURCE_SHEET_COLUMN.to_string());
                columns.len() - 1
            }
        };
        let width = columns.len();

        let body: Vec<Vec<String>> = rows
            .map(|row| {
                let mut cells: Vec<String> = row.iter().map(cell_to_string).collect();
                cells.resize(width, EMPTY_CELL.to_string());
                cells[marker] = sheet.clone();
                cells
            })
            .collect();

        table.append_frame(&columns, body);
        sheets_read += 1;
    }

    if sheets_read == 0 {
        return Err(AppError::MalformedInput(
            "workbook has no non-empty sheet".into(),
        ));
    }

    Ok(table)
}

/// Renders a cell as text. Dates use `YYYY-MM-DD HH:MM:SS`.
fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => EMPTY_CELL.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|d| d.to_string())
            .unwrap_or_else(|| cell.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn garbage_bytes_are_malformed() {
        let err = parse(b"PK\x03\x04 definitely not a zip archive").unwrap_err();
        assert!(matches!(err, AppError::MalformedInput(msg) if msg.contains("workbook")));
    }

    #[test]
    fn cell_rendering() {
        assert_eq!(cell_to_string(&Data::Empty), "");
        assert_eq!(cell_to_string(&Data::String("Plant A".into())), "Plant A");
        assert_eq!(cell_to_string(&Data::Float(12.5)), "12.5");
        assert_eq!(cell_to_string(&Data::Float(3.0)), "3");
        assert_eq!(cell_to_string(&Data::Int(7)), "7");
        assert_eq!(cell_to_string(&Data::Bool(true)), "true");
    }
}
