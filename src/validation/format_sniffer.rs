//! Format detection for inbox files.
//!
//! Decides how a source file should be parsed from, in order:
//! - the file extension
//! - the backend MIME type (covers extension-less Google-native sheets)
//! - the content itself (zip/OLE magic, JSON brackets, otherwise text)
//!
//! Also inspects delimited text for BOM, line endings, and the delimiter.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// UTF-8 BOM bytes.
pub const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Zip local file header (xlsx, xlsm, ods).
const ZIP_MAGIC: &[u8] = &[0x50, 0x4B, 0x03, 0x04];

/// OLE compound document header (legacy xls).
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Candidate delimiters, in tie-break order.
const DELIMITER_CANDIDATES: &[u8] = b",;\t|";

/// How many bytes of the header line are scanned for delimiter sniffing.
const SNIFF_SAMPLE_SIZE: usize = 64 * 1024;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Parsing strategy for a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableFormat {
    /// Delimited text with the given field separator.
    Delimited { delimiter: u8 },
    /// Workbook readable by calamine (xlsx, xlsm, xlsb, xls, ods).
    Spreadsheet,
    /// Tabular JSON (array of records).
    Json,
}

/// Detected line ending style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineEndings {
    /// Unix-style line endings (\n).
    LF,
    /// Windows-style line endings (\r\n).
    CRLF,
    /// Mixed line endings (both \n and \r\n found).
    Mixed,
    /// No line endings detected (single line or empty).
    Unknown,
}

/// Properties of a delimited text payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextInspection {
    pub has_bom: bool,
    pub line_endings: LineEndings,
}

// ─────────────────────────────────────────────────────────────────────────────
// Public API
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves the parsing strategy for a file.
pub fn detect_format(name: &str, mime_type: Option<&str>, bytes: &[u8]) -> TableFormat {
    if let Some(format) = format_from_extension(name, bytes) {
        return format;
    }
    if let Some(format) = mime_type.and_then(|m| format_from_mime(m, bytes)) {
        return format;
    }
    format_from_content(bytes)
}

/// Returns the payload without a leading UTF-8 BOM.
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Inspects BOM presence and line endings of a text payload.
pub fn inspect_text(bytes: &[u8]) -> TextInspection {
    TextInspection {
        has_bom: bytes.starts_with(UTF8_BOM),
        line_endings: detect_line_endings(bytes),
    }
}

/// Picks the most frequent candidate delimiter on the header line.
///
/// Quoted sections are ignored. Falls back to `,` when no candidate occurs.
pub fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let data = strip_bom(bytes);
    let sample = &data[..data.len().min(SNIFF_SAMPLE_SIZE)];

    let mut counts = [0usize; 4];
    let mut in_quotes = false;
    for &b in sample {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\n' | b'\r' if !in_quotes => break,
            _ if !in_quotes => {
                if let Some(idx) = DELIMITER_CANDIDATES.iter().position(|&d| d == b) {
                    counts[idx] += 1;
                }
            }
            _ => {}
        }
    }

    let mut best = 0;
    for idx in 1..counts.len() {
        if counts[idx] > counts[best] {
            best = idx;
        }
    }
    if counts[best] == 0 {
        b','
    } else {
        DELIMITER_CANDIDATES[best]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn format_from_extension(name: &str, bytes: &[u8]) -> Option<TableFormat> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "csv" | "txt" => Some(TableFormat::Delimited {
            delimiter: sniff_delimiter(bytes),
        }),
        "tsv" | "tab" => Some(TableFormat::Delimited { delimiter: b'\t' }),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(TableFormat::Spreadsheet),
        "json" => Some(TableFormat::Json),
        _ => None,
    }
}

fn format_from_mime(mime: &str, bytes: &[u8]) -> Option<TableFormat> {
    let base = mime.split(';').next().unwrap_or(mime).trim();
    match base {
        "text/csv" | "text/plain" | "application/csv" => Some(TableFormat::Delimited {
            delimiter: sniff_delimiter(bytes),
        }),
        "text/tab-separated-values" => Some(TableFormat::Delimited { delimiter: b'\t' }),
        "application/vnd.google-apps.spreadsheet"
        | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "application/vnd.ms-excel"
        | "application/vnd.ms-excel.sheet.macroenabled.12"
        | "application/vnd.oasis.opendocument.spreadsheet" => Some(TableFormat::Spreadsheet),
        "application/json" => Some(TableFormat::Json),
        _ => None,
    }
}

fn format_from_content(bytes: &[u8]) -> TableFormat {
    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
        return TableFormat::Spreadsheet;
    }

    let first = strip_bom(bytes)
        .iter()
        .copied()
        .find(|b| !b.is_ascii_whitespace());
    match first {
        Some(b'[') | Some(b'{') => TableFormat::Json,
        _ => TableFormat::Delimited {
            delimiter: sniff_delimiter(bytes),
        },
    }
}

fn detect_line_endings(bytes: &[u8]) -> LineEndings {
    let mut lf = 0usize;
    let mut crlf = 0usize;
    let mut prev = 0u8;
    for &b in bytes {
        if b == b'\n' {
            if prev == b'\r' {
                crlf += 1;
            } else {
                lf += 1;
            }
        }
        prev = b;
    }

    match (lf, crlf) {
        (0, 0) => LineEndings::Unknown,
        (_, 0) => LineEndings::LF,
        (0, _) => LineEndings::CRLF,
        _ => LineEndings::Mixed,
    }
}
