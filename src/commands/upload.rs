//! Inbox upload command.

use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::error::AppError;
use crate::gateway::safe_filename;
use crate::state::AppState;

/// One file placed in the inbox.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub source: String,
    /// Name in the inbox after sanitizing.
    pub name: String,
    pub id: String,
    pub bytes: u64,
}

/// Copies local files into the inbox zone. An existing inbox file with the
/// same name is replaced.
///
/// Stops at the first failure; files uploaded before it stay in the inbox.
pub async fn upload_files(
    state: &AppState,
    paths: &[PathBuf],
) -> Result<Vec<UploadedFile>, AppError> {
    let inbox = &state.config.zones.inbox;
    let mut uploaded = Vec::with_capacity(paths.len());

    for path in paths {
        if state.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let name = path
            .file_name()
            .map(|n| safe_filename(&n.to_string_lossy()))
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                AppError::Config(format!("{} does not name a file", path.display()))
            })?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::from_io(path.display().to_string(), e))?;
        let size = bytes.len() as u64;

        let id = state
            .gateway
            .write(inbox, &name, bytes)
            .await
            .map_err(|e| e.in_zone("inbox"))?;
        info!("[UPLOAD] {} -> inbox/{} ({} bytes)", path.display(), name, size);

        uploaded.push(UploadedFile {
            source: path.display().to_string(),
            name,
            id,
            bytes: size,
        });
    }

    Ok(uploaded)
}
