//! Google Drive v3 gateway with bearer-token auth and safe logging.
//!
//! Folders are Drive folder ids. Quirks handled here:
//! - paginated listings across shared drives
//! - Google-native spreadsheets exported as xlsx on read
//! - create-or-replace by name on write
//! - moves expressed as parent changes

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use super::{EntryKind, GatewayFuture, SourceFile, StorageGateway};
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all Drive API requests.
const CLIENT_USER_AGENT: &str = concat!("inbox-import/", env!("CARGO_PKG_VERSION"));

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Public Drive API origin.
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/";

/// MIME type Drive uses for folders.
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Google-native spreadsheet, exported as xlsx.
const GOOGLE_SHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

/// Prefix of every Google-native document type.
const GOOGLE_APPS_PREFIX: &str = "application/vnd.google-apps.";

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, size, modifiedTime)";

const PAGE_SIZE: &str = "1000";

/// 403 reasons that signal throttling rather than missing access.
const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "access_token",
    "refresh_token",
    "client_secret",
    "code",
    "token",
    "key",
    "authorization",
];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Strips scheme, host, query, and fragment.
    /// Example: `/drive/v3/files`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    /// Example: `/drive/v3/files?key=***&pageSize=1000`
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Determines if a query parameter key is sensitive and should be redacted.
fn is_sensitive_param(key: &str) -> bool {
    let key_lower = key.to_ascii_lowercase();
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|&sensitive| key_lower == sensitive)
}

/// Sanitizes a URL for safe logging. The result never contains the
/// scheme, host, or fragment.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let path = url.path();

    match mode {
        LoggingMode::PathOnly => path.to_string(),
        LoggingMode::PathAndQueryRedacted => {
            let query_pairs: Vec<_> = url.query_pairs().collect();
            if query_pairs.is_empty() {
                return path.to_string();
            }

            let redacted_pairs: Vec<String> = query_pairs
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_param(&key) {
                        format!("{}=***", key)
                    } else {
                        format!("{}={}", key, value)
                    }
                })
                .collect();

            format!("{}?{}", path, redacted_pairs.join("&"))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFileList {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<WireFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    id: String,
    name: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    modified_time: Option<DateTime<Utc>>,
    /// Drive reports sizes as decimal strings.
    #[serde(default)]
    size: Option<String>,
}

impl WireFile {
    fn into_source_file(self, folder: &str) -> SourceFile {
        let kind = if self.mime_type.as_deref() == Some(FOLDER_MIME) {
            EntryKind::Folder
        } else {
            EntryKind::File
        };
        SourceFile {
            id: self.id,
            name: self.name,
            folder: folder.to_string(),
            modified_time: self.modified_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            size: self.size.and_then(|s| s.parse().ok()),
            mime_type: self.mime_type,
            kind,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct WireErrorEnvelope {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<WireErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// DriveGateway
// ─────────────────────────────────────────────────────────────────────────────

/// Drive v3 REST gateway. Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct DriveGateway {
    http: reqwest::Client,
    base_url: Url,
    access_token: SecretString,
    logging_mode: LoggingMode,
}

impl std::fmt::Debug for DriveGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveGateway")
            .field("base_url", &self.base_url.as_str())
            .field("access_token", &"[REDACTED]")
            .field("logging_mode", &self.logging_mode)
            .finish()
    }
}

impl DriveGateway {
    /// Creates a gateway against `base_url` (an origin such as
    /// `https://www.googleapis.com/`).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` for an unparseable base URL and
    /// `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(base_url: &str, access_token: SecretString) -> Result<Self, AppError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("Invalid Drive API base URL: {}", e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            http: build_http_client()?,
            base_url,
            access_token,
            logging_mode: LoggingMode::default(),
        })
    }

    /// Updates the logging mode for URL sanitization.
    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, AppError> {
        self.base_url
            .join(path)
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", path)))
    }

    /// `<base>/<path>/<id>[/<suffix>]` with the id percent-encoded as one segment.
    fn file_url(&self, path: &str, id: &str, suffix: Option<&str>) -> Result<Url, AppError> {
        let mut url = self.endpoint(path)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| AppError::Internal("Drive base URL cannot carry a path".into()))?;
            segments.pop_if_empty().push(id);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    /// Executes one authenticated request with timing and logging, and maps
    /// non-success statuses onto the storage error taxonomy.
    ///
    /// Never logs the Authorization header, request bodies, or response bodies.
    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<(Vec<u8>, String)>,
        context: &str,
    ) -> Result<reqwest::Response, AppError> {
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(&url, self.logging_mode);

        let mut request = self
            .http
            .request(method.clone(), url.as_str())
            .bearer_auth(self.access_token.expose_secret());
        if let Some((bytes, content_type)) = body {
            request = request.header(CONTENT_TYPE, content_type).body(bytes);
        }

        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                info!(
                    "[DRIVE] {} {} FAILED {}ms",
                    method, sanitized_url, duration_ms
                );
                let kind = if e.is_timeout() { "timed out" } else { "failed" };
                return Err(AppError::TransientStorage(format!(
                    "Connection to Drive {}",
                    kind
                )));
            }
        };

        let status = response.status();
        info!(
            "[DRIVE] {} {} {} {}ms",
            method,
            sanitized_url,
            status.as_u16(),
            duration_ms
        );

        if status.is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response, context).await)
        }
    }

    async fn list_matching(&self, folder: &str, query: String) -> Result<Vec<SourceFile>, AppError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.endpoint("drive/v3/files")?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs
                    .append_pair("q", &query)
                    .append_pair("fields", LIST_FIELDS)
                    .append_pair("pageSize", PAGE_SIZE)
                    .append_pair("supportsAllDrives", "true")
                    .append_pair("includeItemsFromAllDrives", "true");
                if let Some(token) = &page_token {
                    pairs.append_pair("pageToken", token);
                }
            }

            let response = self.send(Method::GET, url, None, folder).await?;
            let page: WireFileList = response.json().await.map_err(|e| {
                AppError::TransientStorage(format!("Unreadable Drive listing: {}", e))
            })?;

            files.extend(page.files.into_iter().map(|f| f.into_source_file(folder)));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(folder, count = files.len(), "[DRIVE] Listed folder");
        Ok(files)
    }

    async fn create_file(&self, folder: &str, name: &str, bytes: Vec<u8>) -> Result<String, AppError> {
        let mut url = self.endpoint("upload/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("uploadType", "multipart")
            .append_pair("supportsAllDrives", "true")
            .append_pair("fields", "id");

        let metadata = serde_json::json!({ "name": name, "parents": [folder] });
        let boundary = format!("inbox_import_{}", Uuid::new_v4().simple());
        let body = multipart_related(&boundary, &metadata, guess_mime(name), &bytes);

        let response = self
            .send(
                Method::POST,
                url,
                Some((body, format!("multipart/related; boundary={}", boundary))),
                folder,
            )
            .await?;
        let created: WireCreated = response.json().await.map_err(|e| {
            AppError::TransientStorage(format!("Unreadable Drive create response: {}", e))
        })?;

        info!("[DRIVE] Created {} in {}", name, folder);
        Ok(created.id)
    }

    async fn update_file(&self, folder: &str, id: &str, name: &str, bytes: Vec<u8>) -> Result<(), AppError> {
        let mut url = self.file_url("upload/drive/v3/files", id, None)?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("supportsAllDrives", "true");

        self.send(
            Method::PATCH,
            url,
            Some((bytes, guess_mime(name).to_string())),
            folder,
        )
        .await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StorageGateway
// ─────────────────────────────────────────────────────────────────────────────

impl StorageGateway for DriveGateway {
    fn list<'a>(&'a self, folder: &'a str) -> GatewayFuture<'a, Vec<SourceFile>> {
        Box::pin(async move {
            let query = format!("'{}' in parents and trashed=false", escape_query(folder));
            self.list_matching(folder, query).await
        })
    }

    fn find<'a>(&'a self, folder: &'a str, name: &'a str) -> GatewayFuture<'a, Option<SourceFile>> {
        Box::pin(async move {
            let query = format!(
                "'{}' in parents and name='{}' and trashed=false",
                escape_query(folder),
                escape_query(name)
            );
            let matches = self.list_matching(folder, query).await?;
            Ok(matches.into_iter().find(SourceFile::is_file))
        })
    }

    fn read<'a>(&'a self, file: &'a SourceFile) -> GatewayFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let mime = file.mime_type.as_deref().unwrap_or_default();

            let url = if mime == GOOGLE_SHEET_MIME {
                let mut url = self.file_url("drive/v3/files", &file.id, Some("export"))?;
                url.query_pairs_mut().append_pair("mimeType", XLSX_MIME);
                url
            } else if mime.starts_with(GOOGLE_APPS_PREFIX) {
                return Err(AppError::MalformedInput(format!(
                    "{} is a Google-native {} document, not a table",
                    file.name,
                    mime.trim_start_matches(GOOGLE_APPS_PREFIX)
                )));
            } else {
                let mut url = self.file_url("drive/v3/files", &file.id, None)?;
                url.query_pairs_mut()
                    .append_pair("alt", "media")
                    .append_pair("supportsAllDrives", "true");
                url
            };

            let response = self.send(Method::GET, url, None, &file.folder).await?;
            let bytes = response.bytes().await.map_err(|e| {
                AppError::TransientStorage(format!("Download of {} interrupted: {}", file.name, e))
            })?;
            Ok(bytes.to_vec())
        })
    }

    fn write<'a>(
        &'a self,
        folder: &'a str,
        name: &'a str,
        bytes: Vec<u8>,
    ) -> GatewayFuture<'a, String> {
        Box::pin(async move {
            match self.find(folder, name).await? {
                Some(existing) => {
                    self.update_file(folder, &existing.id, name, bytes).await?;
                    Ok(existing.id)
                }
                None => self.create_file(folder, name, bytes).await,
            }
        })
    }

    fn move_entry<'a>(
        &'a self,
        id: &'a str,
        from: &'a str,
        to: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let mut url = self.file_url("drive/v3/files", id, None)?;
            url.query_pairs_mut()
                .append_pair("addParents", to)
                .append_pair("removeParents", from)
                .append_pair("supportsAllDrives", "true")
                .append_pair("fields", "id, parents");

            self.send(
                Method::PATCH,
                url,
                Some((b"{}".to_vec(), "application/json".to_string())),
                to,
            )
            .await?;
            Ok(())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the shared HTTP client with user agent and timeout.
fn build_http_client() -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Reads a Drive error body and classifies it.
async fn error_from_response(response: reqwest::Response, context: &str) -> AppError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    let (message, reason) = match serde_json::from_str::<WireErrorEnvelope>(&body) {
        Ok(envelope) => {
            let reason = envelope
                .error
                .errors
                .into_iter()
                .find_map(|detail| detail.reason);
            (envelope.error.message, reason)
        }
        Err(_) => (String::new(), None),
    };

    let message = if message.is_empty() {
        format!(
            "HTTP {} - {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown error")
        )
    } else {
        format!("HTTP {} - {}", status.as_u16(), message)
    };

    classify_status(status, reason.as_deref(), context, message)
}

/// Maps an HTTP failure onto the storage error taxonomy.
fn classify_status(status: StatusCode, reason: Option<&str>, context: &str, message: String) -> AppError {
    match status {
        StatusCode::UNAUTHORIZED => AppError::Permission {
            zone: context.to_string(),
            message,
        },
        StatusCode::FORBIDDEN => {
            if reason.map_or(false, |r| RATE_LIMIT_REASONS.contains(&r)) {
                AppError::TransientStorage(message)
            } else {
                AppError::Permission {
                    zone: context.to_string(),
                    message,
                }
            }
        }
        StatusCode::NOT_FOUND => AppError::NotFound(format!("{}: {}", context, message)),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            AppError::TransientStorage(message)
        }
        s if s.is_server_error() => AppError::TransientStorage(message),
        _ => AppError::Internal(format!("Drive request rejected: {}", message)),
    }
}

/// Escapes a value for use inside a single-quoted Drive query literal.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

fn guess_mime(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => "text/csv",
        "tsv" => "text/tab-separated-values",
        "json" | "lock" => "application/json",
        "xlsx" => XLSX_MIME,
        "xls" => "application/vnd.ms-excel",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        _ => "application/octet-stream",
    }
}

/// Builds a `multipart/related` body: JSON metadata part, then media part.
fn multipart_related(
    boundary: &str,
    metadata: &serde_json::Value,
    media_type: &str,
    bytes: &[u8],
) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", media_type).as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
