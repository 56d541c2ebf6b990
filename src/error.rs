use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for operator display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "refresh_token",
    "access_token",
    "client_secret",
    "authorization:",
    "private_key",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// Operator-facing error presentation.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Storage ───────────────────────────────────────────────────────────────
    #[error("Transient storage error: {0}")]
    TransientStorage(String),

    #[error("Permission denied on {zone}: {message}")]
    Permission { zone: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // ── Input ─────────────────────────────────────────────────────────────────
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    // ── Pipeline state ────────────────────────────────────────────────────────
    #[error("Manifest is corrupt: {0}")]
    ManifestCorrupt(String),

    #[error("Import lease held by {holder_id} until {expires_at}")]
    LeaseHeld { holder_id: String, expires_at: String },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Setup ─────────────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Maps an I/O error onto the storage taxonomy.
    ///
    /// `PermissionDenied` becomes `Permission` with `context` as the zone,
    /// `NotFound` stays `NotFound`, and anything else is treated as transient.
    pub fn from_io(context: impl Into<String>, err: std::io::Error) -> Self {
        let context = context.into();
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => AppError::Permission {
                zone: context,
                message: err.to_string(),
            },
            std::io::ErrorKind::NotFound => AppError::NotFound(format!("{}: {}", context, err)),
            _ => AppError::TransientStorage(format!("{}: {}", context, err)),
        }
    }

    /// Returns true if retrying the same call may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::TransientStorage(_))
    }

    /// Returns true for errors that must abort the whole import cycle.
    pub fn is_fatal_for_cycle(&self) -> bool {
        matches!(
            self,
            AppError::Permission { .. }
                | AppError::ManifestCorrupt(_)
                | AppError::LeaseHeld { .. }
                | AppError::Config(_)
                | AppError::Cancelled
        )
    }

    /// Relabels a permission error with the logical zone it occurred in.
    ///
    /// Gateways only know folder identifiers; the orchestrator knows which
    /// zone (inbox, archive, output) a folder plays.
    pub fn in_zone(self, zone: &str) -> Self {
        match self {
            AppError::Permission { zone: folder, message } => AppError::Permission {
                zone: format!("{} zone ({})", zone, folder),
                message,
            },
            other => other,
        }
    }

    /// Converts the error into an operator-friendly presentation.
    /// Never leaks secrets, tokens, or sensitive URL parameters.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Storage ───────────────────────────────────────────────────────
            AppError::TransientStorage(msg) => ErrorPresentation {
                title: "Storage Temporarily Unavailable".into(),
                message: sanitize_message(msg, "The storage backend did not respond."),
                action: Some("Run the import again later".into()),
            },

            AppError::Permission { zone, .. } => ErrorPresentation {
                title: "Access Denied".into(),
                message: format!(
                    "The configured identity cannot access the {}.",
                    sanitize_message(zone, "storage zone")
                ),
                action: Some("Grant read/write access to the zone and retry".into()),
            },

            AppError::NotFound(msg) => ErrorPresentation {
                title: "Not Found".into(),
                message: sanitize_message(msg, "The requested entry does not exist."),
                action: None,
            },

            // ── Input ─────────────────────────────────────────────────────────
            AppError::MalformedInput(msg) => ErrorPresentation {
                title: "Unreadable File".into(),
                message: format!(
                    "The file could not be read as a table: {}",
                    sanitize_message(msg, "invalid content")
                ),
                action: Some("Fix or replace the file in the inbox".into()),
            },

            // ── Pipeline state ────────────────────────────────────────────────
            AppError::ManifestCorrupt(msg) => ErrorPresentation {
                title: "Manifest Inconsistent".into(),
                message: format!(
                    "The manifest does not match the merged dataset: {}",
                    sanitize_message(msg, "integrity check failed")
                ),
                action: Some("Restore the output zone from backup before importing".into()),
            },

            AppError::LeaseHeld { expires_at, .. } => ErrorPresentation {
                title: "Import Already Running".into(),
                message: format!("Another import holds the lease until {}.", expires_at),
                action: Some("Wait for the other run to finish and retry".into()),
            },

            AppError::Cancelled => ErrorPresentation {
                title: "Cancelled".into(),
                message: "The operation was cancelled.".into(),
                action: None,
            },

            // ── Setup ─────────────────────────────────────────────────────────
            AppError::Config(msg) => ErrorPresentation {
                title: "Invalid Configuration".into(),
                message: sanitize_message(msg, "The configuration is invalid."),
                action: Some("Fix the configuration and retry".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

// JSON output never carries raw error text
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}
