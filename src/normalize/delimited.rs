//! Delimited text (CSV/TSV) parsing.

use csv::ReaderBuilder;

use super::{clean_headers, NormalizedTable, EMPTY_CELL};
use crate::error::AppError;
use crate::validation::{inspect_text, strip_bom, LineEndings, TableFormat};

pub(super) fn parse(bytes: &[u8], delimiter: u8) -> Result<NormalizedTable, AppError> {
    let inspection = inspect_text(bytes);
    let data = strip_bom(bytes);

    if let Err(e) = std::str::from_utf8(data) {
        return Err(AppError::MalformedInput(format!(
            "not valid UTF-8 (first invalid byte at offset {})",
            e.valid_up_to()
        )));
    }
    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::MalformedInput("no header row".into()));
    }

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let headers = reader
        .headers()
        .map_err(|e| AppError::MalformedInput(format!("unreadable header: {}", e)))?
        .clone();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(AppError::MalformedInput("header row is blank".into()));
    }

    let mut table = NormalizedTable::new(TableFormat::Delimited { delimiter });
    table.columns = clean_headers(headers.iter().map(str::to_string));
    let width = table.columns.len();

    for record in reader.records() {
        let record = record.map_err(|e| AppError::MalformedInput(format!("bad record: {}", e)))?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        if record.len() > width {
            return Err(AppError::MalformedInput(format!(
                "line {} has {} fields, header has {}",
                line,
                record.len(),
                width
            )));
        }

        let mut row: Vec<String> = record.iter().map(str::to_string).collect();
        row.resize(width, EMPTY_CELL.to_string());
        table.rows.push(row);
    }

    if inspection.has_bom {
        table.notes.push("stripped UTF-8 byte order mark".into());
    }
    if inspection.line_endings == LineEndings::Mixed {
        table.notes.push("file mixes LF and CRLF line endings".into());
    }

    Ok(table)
}
