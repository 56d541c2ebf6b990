//! The accumulated (merged) dataset and its canonical CSV encoding.
//!
//! Encoding is deterministic: comma separator, `\n` terminators, minimal
//! quoting, header first. Decoding an encoded dataset and encoding it
//! again yields identical bytes, which is what the manifest digest relies on.

use csv::{QuoteStyle, ReaderBuilder, Terminator, WriterBuilder};
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::validation::strip_bom;

/// Ordered rows sharing one unified column schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatedDataset {
    pub(crate) columns: Vec<String>,
    pub(crate) rows: Vec<Vec<String>>,
}

impl AccumulatedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }

    /// Returns the cell for `column` in row `row`, if both exist.
    pub fn cell(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).map(|r| r[idx].as_str())
    }

    /// Encodes the dataset as canonical CSV bytes.
    pub fn encode(&self) -> Result<Vec<u8>, AppError> {
        if self.columns.is_empty() {
            return Ok(Vec::new());
        }

        let mut writer = WriterBuilder::new()
            .terminator(Terminator::Any(b'\n'))
            .quote_style(QuoteStyle::Necessary)
            .from_writer(Vec::new());

        writer
            .write_record(&self.columns)
            .map_err(|e| AppError::Internal(format!("Failed to encode header: {}", e)))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|e| AppError::Internal(format!("Failed to encode row: {}", e)))?;
        }

        writer
            .into_inner()
            .map_err(|e| AppError::Internal(format!("Failed to flush dataset: {}", e.error())))
    }

    /// Parses dataset bytes previously produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns `AppError::MalformedInput` if the bytes are not a rectangular CSV.
    pub fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        let data = strip_bom(bytes);
        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::new());
        }

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(data);

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| AppError::MalformedInput(format!("dataset header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| AppError::MalformedInput(format!("dataset row: {}", e)))?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self { columns, rows })
    }

    /// Drops every row past the first `rows`.
    pub(crate) fn truncate(&mut self, rows: usize) {
        self.rows.truncate(rows);
    }

    /// Restricts the schema to `columns`, in that order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MalformedInput` naming the first column not present.
    pub(crate) fn project(&mut self, columns: &[String]) -> Result<(), AppError> {
        if self.columns == columns {
            return Ok(());
        }

        let mut positions = Vec::with_capacity(columns.len());
        for column in columns {
            let idx = self
                .columns
                .iter()
                .position(|c| c == column)
                .ok_or_else(|| {
                    AppError::MalformedInput(format!("dataset lacks column '{}'", column))
                })?;
            positions.push(idx);
        }

        for row in &mut self.rows {
            let projected: Vec<String> = positions.iter().map(|&idx| row[idx].clone()).collect();
            *row = projected;
        }
        self.columns = columns.to_vec();
        Ok(())
    }
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn content_digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
