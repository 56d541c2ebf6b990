//! Filesystem-backed gateway. Folders are directories directly under a
//! root; entry ids are file names.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{EntryKind, GatewayFuture, SourceFile, StorageGateway};
use crate::error::AppError;
use crate::streaming::write_atomic;

/// Gateway over a local directory tree.
#[derive(Debug, Clone)]
pub struct LocalGateway {
    root: PathBuf,
}

impl LocalGateway {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates `folder` under the root if it does not exist yet.
    pub async fn ensure_folder(&self, folder: &str) -> Result<(), AppError> {
        let path = self.folder_path(folder)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| AppError::from_io(folder, e))
    }

    fn folder_path(&self, folder: &str) -> Result<PathBuf, AppError> {
        validate_component(folder)?;
        Ok(self.root.join(folder))
    }

    fn entry_path(&self, folder: &str, name: &str) -> Result<PathBuf, AppError> {
        validate_component(name)?;
        Ok(self.folder_path(folder)?.join(name))
    }
}

/// Folder and entry names must be a single, non-special path component.
fn validate_component(name: &str) -> Result<(), AppError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(AppError::Config(format!(
            "'{}' is not a valid folder or file name",
            name
        )));
    }
    Ok(())
}

async fn run_blocking<T, F>(task: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| AppError::Internal(format!("Storage task failed: {}", e)))?
}

// ─────────────────────────────────────────────────────────────────────────────
// Blocking operations
// ─────────────────────────────────────────────────────────────────────────────

/// Prefix of the temporary siblings created by atomic writes.
const TEMP_PREFIX: &str = ".tmp";

fn list_blocking(dir: &Path, folder: &str) -> Result<Vec<SourceFile>, AppError> {
    let entries = std::fs::read_dir(dir).map_err(|e| AppError::from_io(folder, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AppError::from_io(folder, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if name.starts_with(TEMP_PREFIX) {
            debug!(folder, name = %name, "[LOCAL] Skipping in-flight temporary file");
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(m) => m,
            // Removed between read_dir and stat
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(AppError::from_io(folder, e)),
        };
        let modified = metadata
            .modified()
            .map_err(|e| AppError::from_io(folder, e))?;

        let kind = if metadata.is_dir() {
            EntryKind::Folder
        } else {
            EntryKind::File
        };

        files.push(SourceFile {
            id: name.clone(),
            name,
            folder: folder.to_string(),
            modified_time: DateTime::<Utc>::from(modified),
            mime_type: None,
            size: (kind == EntryKind::File).then(|| metadata.len()),
            kind,
        });
    }

    Ok(files)
}

fn move_blocking(source: &Path, dest_dir: &Path, id: &str, to: &str) -> Result<String, AppError> {
    if !source.exists() {
        return Err(AppError::NotFound(format!("{} is no longer in the source folder", id)));
    }
    if !dest_dir.is_dir() {
        return Err(AppError::NotFound(format!("destination folder {} does not exist", to)));
    }

    let dest_name = unique_name(dest_dir, id);
    std::fs::rename(source, dest_dir.join(&dest_name)).map_err(|e| AppError::from_io(to, e))?;
    Ok(dest_name)
}

/// Returns `name`, or `stem__N.ext` for the first free N if `name` is taken.
fn unique_name(dir: &Path, name: &str) -> String {
    if !dir.join(name).exists() {
        return name.to_string();
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, format!(".{}", ext)),
        _ => (name, String::new()),
    };

    let mut n = 1u32;
    loop {
        let candidate = format!("{}__{}{}", stem, n, ext);
        if !dir.join(&candidate).exists() {
            return candidate;
        }
        n += 1;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StorageGateway
// ─────────────────────────────────────────────────────────────────────────────

impl StorageGateway for LocalGateway {
    fn list<'a>(&'a self, folder: &'a str) -> GatewayFuture<'a, Vec<SourceFile>> {
        Box::pin(async move {
            let dir = self.folder_path(folder)?;
            let folder_owned = folder.to_string();
            let files = run_blocking(move || list_blocking(&dir, &folder_owned)).await?;
            debug!(folder, count = files.len(), "[LOCAL] Listed folder");
            Ok(files)
        })
    }

    fn read<'a>(&'a self, file: &'a SourceFile) -> GatewayFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let path = self.entry_path(&file.folder, &file.id)?;
            tokio::fs::read(&path)
                .await
                .map_err(|e| AppError::from_io(file.folder.as_str(), e))
        })
    }

    fn write<'a>(
        &'a self,
        folder: &'a str,
        name: &'a str,
        bytes: Vec<u8>,
    ) -> GatewayFuture<'a, String> {
        Box::pin(async move {
            let path = self.entry_path(folder, name)?;
            let len = bytes.len();
            run_blocking(move || write_atomic(&path, &bytes).map(|_| ())).await?;
            debug!(folder, name, bytes = len, "[LOCAL] Wrote file");
            Ok(name.to_string())
        })
    }

    fn move_entry<'a>(
        &'a self,
        id: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let source = self.entry_path(from, id)?;
            let dest_dir = self.folder_path(to)?;
            let (id_owned, to_owned) = (id.to_string(), to.to_string());
            let dest_name =
                run_blocking(move || move_blocking(&source, &dest_dir, &id_owned, &to_owned))
                    .await?;
            if dest_name != id {
                info!("[LOCAL] {} already existed in {}, stored as {}", id, to, dest_name);
            }
            Ok(())
        })
    }
}
