//! Import cycle command.

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::import::ImportCycleResult;
use crate::state::AppState;
use crate::storage::history;

/// Runs one import cycle and records it in the cycle history.
///
/// History failures are logged and never change the outcome of the cycle.
///
/// # Errors
///
/// Returns the cycle-level error that aborted the cycle, if any.
pub async fn run_import(state: &AppState) -> Result<ImportCycleResult, AppError> {
    let cycle_id = Uuid::new_v4().to_string();
    let started_at = Utc::now();

    let outcome = state.orchestrator().run_cycle_as(&cycle_id).await;

    if let Some(db) = &state.db {
        let recorded = match &outcome {
            Ok(result) => history::record_cycle(db, result).await,
            Err(e) => history::record_aborted_cycle(db, &cycle_id, started_at, e).await,
        };
        if let Err(e) = recorded {
            warn!("[IMPORT] Failed to record cycle {} in history: {}", cycle_id, e);
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::import::Disposition;
    use crate::storage::history::CycleOutcome;
    use std::fs;
    use tempfile::TempDir;

    async fn state(dir: &TempDir) -> AppState {
        let mut config = Config::default();
        config.local.root = dir.path().join("zones");
        config.history_db = Some(dir.path().join("history.db"));
        AppState::init(config).await.expect("init")
    }

    #[tokio::test]
    async fn completed_cycle_is_recorded() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let state = state(&dir).await;
        fs::write(dir.path().join("zones/inbox/a.csv"), "id,v\n1,x\n").expect("write");

        let result = run_import(&state).await.expect("import");
        assert_eq!(result.imported, 1);
        assert_eq!(result.files[0].disposition, Disposition::Imported);

        let db = state.history().expect("history");
        let cycles = history::list_cycles(db, 10).await.expect("list");
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].cycle_id, result.cycle_id);
        assert_eq!(cycles[0].outcome, CycleOutcome::Completed);
        assert_eq!(cycles[0].total_rows, 1);
    }

    #[tokio::test]
    async fn aborted_cycle_is_recorded_with_presentation_only() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let state = state(&dir).await;
        fs::write(dir.path().join("zones/extract/merged.csv"), "id\n1\n").expect("write");

        let err = run_import(&state).await.unwrap_err();
        assert!(matches!(err, AppError::ManifestCorrupt(_)));

        let cycles = history::list_cycles(state.history().expect("history"), 10)
            .await
            .expect("list");
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].outcome, CycleOutcome::Aborted);
        assert!(cycles[0]
            .error_message
            .as_deref()
            .is_some_and(|m| m.starts_with("Manifest Inconsistent")));
    }

    #[tokio::test]
    async fn cancelled_before_start_is_an_error() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let state = state(&dir).await;
        state.cancel.cancel();

        assert!(matches!(run_import(&state).await, Err(AppError::Cancelled)));
    }
}
