//! Atomic file writer with automatic cleanup on failure.
//!
//! Writes to a temporary file in the same directory as the destination,
//! then atomically replaces the destination on `finish()`. If dropped
//! before finishing, the temporary file is automatically cleaned up.
//!
//! Every artifact the local backend persists (merged dataset, manifest,
//! lease) and every exported file goes through this writer, so readers
//! only ever observe the old or the new content.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::AppError;

/// Writes to a temporary sibling and renames it over the destination on `finish()`.
pub struct AtomicFileWriter {
    writer: BufWriter<NamedTempFile>,
    final_path: PathBuf,
}

impl AtomicFileWriter {
    /// Creates a new atomic writer targeting the specified path.
    ///
    /// The temporary file is created in the same directory as `final_path`
    /// so the final rename stays on one filesystem.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the path has no parent directory, or
    /// the storage taxonomy mapping of the I/O error if the temporary file
    /// cannot be created.
    pub fn new(final_path: impl AsRef<Path>) -> Result<Self, AppError> {
        let final_path = final_path.as_ref().to_path_buf();

        let parent_dir = match final_path.parent() {
            Some(p) if p.as_os_str().is_empty() => Path::new("."),
            Some(p) => p,
            None => {
                return Err(AppError::Internal(format!(
                    "Cannot determine parent directory for: {}",
                    final_path.display()
                )))
            }
        };

        let temp_file = NamedTempFile::new_in(parent_dir)
            .map_err(|e| AppError::from_io(parent_dir.display().to_string(), e))?;

        Ok(Self {
            writer: BufWriter::new(temp_file),
            final_path,
        })
    }

    /// Appends bytes to the pending file.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), AppError> {
        self.writer
            .write_all(bytes)
            .map_err(|e| AppError::from_io(self.final_path.display().to_string(), e))
    }

    /// Flushes all buffers and atomically persists the file to the final path.
    ///
    /// On error, the temporary file is cleaned up automatically.
    pub fn finish(self) -> Result<PathBuf, AppError> {
        let named_temp = self.writer.into_inner().map_err(|e| {
            AppError::TransientStorage(format!("Failed to flush buffer: {}", e.error()))
        })?;

        named_temp
            .as_file()
            .sync_all()
            .map_err(|e| AppError::from_io(self.final_path.display().to_string(), e))?;

        named_temp
            .persist(&self.final_path)
            .map_err(|e| AppError::from_io(self.final_path.display().to_string(), e.error))?;

        Ok(self.final_path)
    }
}

/// Writes `bytes` to `path` atomically in one call.
pub fn write_atomic(path: impl AsRef<Path>, bytes: &[u8]) -> Result<PathBuf, AppError> {
    let mut writer = AtomicFileWriter::new(path)?;
    writer.write_all(bytes)?;
    writer.finish()
}
