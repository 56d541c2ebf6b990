//! Text and JSON rendering of command results.

use serde::Serialize;

use super::OutputFormat;
use crate::commands::{CycleSummary, ExportResult, FileEventInfo, StatusReport, UploadedFile};
use crate::error::AppError;
use crate::import::{Disposition, ImportCycleResult};

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Internal(format!("Failed to encode output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

/// Prints an error to stderr. Only the operator presentation is shown.
pub fn print_error(error: &AppError, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(error) {
            Ok(json) => eprintln!("{}", json),
            Err(_) => eprintln!("{}", error.to_presentation().title),
        },
        OutputFormat::Text => {
            let presentation = error.to_presentation();
            eprintln!("error: {}: {}", presentation.title, presentation.message);
            if let Some(action) = presentation.action {
                eprintln!("  hint: {}", action);
            }
        }
    }
}

pub(super) fn print_cycle(result: &ImportCycleResult, format: OutputFormat) -> Result<(), AppError> {
    if format == OutputFormat::Json {
        return print_json(result);
    }

    let elapsed = result.finished_at - result.started_at;
    println!(
        "Cycle {}{} ({} ms)",
        result.cycle_id,
        if result.cancelled { " cancelled" } else { "" },
        elapsed.num_milliseconds()
    );
    println!(
        "  imported {}, skipped {}, failed {}, archive retries {}, vanished {}",
        result.imported, result.skipped, result.failed, result.archive_retried, result.vanished
    );
    println!(
        "  rows added {}, superseded {}; dataset now {} rows x {} columns",
        result.rows_added, result.rows_superseded, result.total_rows, result.total_columns
    );

    let notable = result
        .files
        .iter()
        .filter(|f| f.disposition != Disposition::Skipped);
    for file in notable {
        match &file.note {
            Some(note) => println!(
                "  {:<26} {} ({} rows): {}",
                file.disposition.as_str(),
                file.name,
                file.rows,
                note
            ),
            None => println!(
                "  {:<26} {} ({} rows)",
                file.disposition.as_str(),
                file.name,
                file.rows
            ),
        }
    }
    Ok(())
}

pub(super) fn print_uploads(uploaded: &[UploadedFile], format: OutputFormat) -> Result<(), AppError> {
    if format == OutputFormat::Json {
        return print_json(uploaded);
    }
    for file in uploaded {
        println!("Uploaded {} as {} ({} bytes)", file.source, file.name, file.bytes);
    }
    Ok(())
}

pub(super) fn print_status(report: &StatusReport, format: OutputFormat) -> Result<(), AppError> {
    if format == OutputFormat::Json {
        return print_json(report);
    }

    println!(
        "Backend {}: inbox={} archive={} output={}",
        report.backend, report.inbox, report.archive, report.output
    );
    println!("Inbox files waiting: {}", report.inbox_files);
    println!(
        "Dataset: {} rows, {} columns [{}]",
        report.dataset_rows,
        report.dataset_columns.len(),
        report.dataset_columns.join(", ")
    );
    println!("  sha256 {}", report.dataset_sha256);
    if let Some(lease) = &report.lease {
        println!(
            "Import running: {} ({}) until {}",
            lease.holder_id, lease.operation, lease.expires_at
        );
    }

    if report.entries.is_empty() {
        println!("No files imported yet");
        return Ok(());
    }
    println!();
    for entry in &report.entries {
        let modified = entry
            .modified_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:<8} {:<40} {:>8} rows  modified {}{}",
            entry.status.as_str(),
            entry.name,
            entry.rows_contributed,
            modified,
            if entry.archived { "" } else { "  (archive pending)" }
        );
        if let Some(error) = &entry.last_error {
            println!("           last error: {}", error);
        }
    }
    Ok(())
}

pub(super) fn print_history(cycles: &[CycleSummary], format: OutputFormat) -> Result<(), AppError> {
    if format == OutputFormat::Json {
        return print_json(cycles);
    }
    if cycles.is_empty() {
        println!("No cycles recorded");
        return Ok(());
    }

    println!("Recent cycles:");
    println!();
    for cycle in cycles {
        println!(
            "  {} {} {:<9} imported {}, skipped {}, failed {}, {} rows",
            cycle.started_at.format("%Y-%m-%d %H:%M:%S"),
            cycle.cycle_id,
            cycle.outcome.as_str(),
            cycle.imported,
            cycle.skipped,
            cycle.failed,
            cycle.total_rows
        );
        if let Some(message) = &cycle.error_message {
            println!("      {}", message);
        }
    }
    Ok(())
}

pub(super) fn print_events(
    cycle_id: &str,
    events: &[FileEventInfo],
    format: OutputFormat,
) -> Result<(), AppError> {
    if format == OutputFormat::Json {
        return print_json(events);
    }
    if events.is_empty() {
        println!("Cycle {} touched no files", cycle_id);
        return Ok(());
    }

    println!("Cycle {}:", cycle_id);
    for event in events {
        print!(
            "  {:<26} {} ({} rows)",
            event.disposition.as_str(),
            event.file_name,
            event.rows
        );
        match &event.note {
            Some(note) => println!(": {}", note),
            None => println!(),
        }
    }
    Ok(())
}

pub(super) fn print_export(result: &ExportResult, format: OutputFormat) -> Result<(), AppError> {
    if format == OutputFormat::Json {
        return print_json(result);
    }
    println!(
        "Exported {} rows x {} columns to {} ({} bytes, sha256 {})",
        result.rows, result.columns, result.path, result.bytes, result.sha256
    );
    Ok(())
}
