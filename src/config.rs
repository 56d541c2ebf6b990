//! Runtime configuration.
//!
//! Sources, later wins: built-in defaults, an optional TOML file, the
//! environment (`INBOX_IMPORT_*`, `DRIVE_ACCESS_TOKEN`), then CLI flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

use crate::error::AppError;
use crate::gateway::drive::DEFAULT_API_BASE;
use crate::gateway::RetryPolicy;
use crate::import::ImportSettings;
use crate::normalize::TableNormalizer;
use crate::streaming::{MergeEngine, ReimportPolicy};

/// Environment variable holding the Drive bearer token.
pub const ACCESS_TOKEN_ENV: &str = "DRIVE_ACCESS_TOKEN";

/// Prefix of every other environment override.
const ENV_PREFIX: &str = "INBOX_IMPORT_";

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// Which storage backend holds the zones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Local,
    Drive,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Drive => "drive",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendKind::Local),
            "drive" => Ok(BackendKind::Drive),
            other => Err(AppError::Config(format!(
                "unknown backend '{}', expected local or drive",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalConfig {
    /// Directory whose sub-directories are the zones.
    pub root: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data"),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriveConfig {
    pub api_base: String,
    /// Never read from files; only from the environment.
    #[serde(skip)]
    pub access_token: Option<SecretString>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            access_token: None,
        }
    }
}

impl std::fmt::Debug for DriveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveConfig")
            .field("api_base", &self.api_base)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Folder identifiers of the three zones (directory names or Drive folder ids).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZoneConfig {
    pub inbox: String,
    pub archive: String,
    pub output: String,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            inbox: "inbox".into(),
            archive: "archive".into(),
            output: "extract".into(),
        }
    }
}

/// File names of the artifacts kept in the output zone.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArtifactConfig {
    pub dataset_name: String,
    pub manifest_name: String,
    pub lease_name: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dataset_name: "merged.csv".into(),
            manifest_name: "manifest.json".into(),
            lease_name: "import.lock".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub backend: BackendKind,
    pub local: LocalConfig,
    pub drive: DriveConfig,
    pub zones: ZoneConfig,
    pub artifacts: ArtifactConfig,
    pub retry: RetryConfig,
    pub fetch_concurrency: usize,
    pub lease_ttl_secs: u64,
    /// Append `__source_file`, `__source_id`, `__modified_time` to every row.
    pub provenance_columns: bool,
    pub reimport_policy: ReimportPolicy,
    /// Cycle history database. `None` disables history.
    pub history_db: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            local: LocalConfig::default(),
            drive: DriveConfig::default(),
            zones: ZoneConfig::default(),
            artifacts: ArtifactConfig::default(),
            retry: RetryConfig::default(),
            fetch_concurrency: 4,
            lease_ttl_secs: 600,
            provenance_columns: false,
            reimport_policy: ReimportPolicy::default(),
            history_db: Some(PathBuf::from("data/history.db")),
        }
    }
}

impl Config {
    /// Defaults, then `path` if given, then the process environment.
    /// Does not validate; CLI overrides still have to be applied.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, AppError> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name))
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = var("BACKEND") {
            self.backend = value.parse()?;
        }
        if let Some(value) = var("LOCAL_ROOT") {
            self.local.root = PathBuf::from(value);
        }
        if let Some(value) = var("DRIVE_API_BASE") {
            self.drive.api_base = value;
        }
        if let Some(token) = lookup(ACCESS_TOKEN_ENV).filter(|t| !t.trim().is_empty()) {
            self.drive.access_token = Some(SecretString::from(token.trim().to_string()));
        }

        if let Some(value) = var("INBOX") {
            self.zones.inbox = value;
        }
        if let Some(value) = var("ARCHIVE") {
            self.zones.archive = value;
        }
        if let Some(value) = var("OUTPUT") {
            self.zones.output = value;
        }

        if let Some(value) = var("DATASET_NAME") {
            self.artifacts.dataset_name = value;
        }
        if let Some(value) = var("MANIFEST_NAME") {
            self.artifacts.manifest_name = value;
        }
        if let Some(value) = var("LEASE_NAME") {
            self.artifacts.lease_name = value;
        }

        if let Some(value) = var("RETRY_ATTEMPTS") {
            self.retry.max_attempts = parse_number(ENV_PREFIX, "RETRY_ATTEMPTS", &value)?;
        }
        if let Some(value) = var("RETRY_BASE_MS") {
            self.retry.base_delay_ms = parse_number(ENV_PREFIX, "RETRY_BASE_MS", &value)?;
        }
        if let Some(value) = var("RETRY_MAX_MS") {
            self.retry.max_delay_ms = parse_number(ENV_PREFIX, "RETRY_MAX_MS", &value)?;
        }
        if let Some(value) = var("FETCH_CONCURRENCY") {
            self.fetch_concurrency = parse_number(ENV_PREFIX, "FETCH_CONCURRENCY", &value)?;
        }
        if let Some(value) = var("LEASE_TTL_SECS") {
            self.lease_ttl_secs = parse_number(ENV_PREFIX, "LEASE_TTL_SECS", &value)?;
        }
        if let Some(value) = var("PROVENANCE_COLUMNS") {
            self.provenance_columns = parse_bool(ENV_PREFIX, "PROVENANCE_COLUMNS", &value)?;
        }
        if let Some(value) = var("REIMPORT_POLICY") {
            self.reimport_policy = value.parse()?;
        }
        // Present but empty disables history
        if let Some(value) = lookup(&format!("{}HISTORY_DB", ENV_PREFIX)) {
            let value = value.trim();
            self.history_db = (!value.is_empty()).then(|| PathBuf::from(value));
        }

        Ok(())
    }

    /// Rejects configurations that cannot run a correct cycle.
    pub fn validate(&self) -> Result<(), AppError> {
        let zones = [
            ("inbox", &self.zones.inbox),
            ("archive", &self.zones.archive),
            ("output", &self.zones.output),
        ];
        for (label, value) in zones {
            if value.trim().is_empty() {
                return Err(AppError::Config(format!("{} zone is not configured", label)));
            }
        }
        for (i, (label_a, a)) in zones.iter().enumerate() {
            for (label_b, b) in &zones[i + 1..] {
                if a == b {
                    return Err(AppError::Config(format!(
                        "{} and {} zones must be different folders",
                        label_a, label_b
                    )));
                }
            }
        }

        let artifacts = [
            &self.artifacts.dataset_name,
            &self.artifacts.manifest_name,
            &self.artifacts.lease_name,
        ];
        if artifacts.iter().any(|name| name.trim().is_empty()) {
            return Err(AppError::Config("artifact names must not be empty".into()));
        }
        if artifacts[0] == artifacts[1] || artifacts[0] == artifacts[2] || artifacts[1] == artifacts[2] {
            return Err(AppError::Config("artifact names must be distinct".into()));
        }

        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(AppError::Config(
                "retry.base_delay_ms cannot exceed retry.max_delay_ms".into(),
            ));
        }
        if self.fetch_concurrency == 0 {
            return Err(AppError::Config("fetch_concurrency must be at least 1".into()));
        }
        if self.lease_ttl_secs == 0 {
            return Err(AppError::Config("lease_ttl_secs must be at least 1".into()));
        }

        if self.reimport_policy == ReimportPolicy::Supersede && !self.provenance_columns {
            return Err(AppError::Config(
                "reimport_policy = \"supersede\" requires provenance_columns = true".into(),
            ));
        }

        if self.backend == BackendKind::Drive {
            Url::parse(&self.drive.api_base)
                .map_err(|e| AppError::Config(format!("drive.api_base is not a URL: {}", e)))?;
            if self.drive.access_token.is_none() {
                return Err(AppError::Config(format!(
                    "the drive backend needs a bearer token in {}",
                    ACCESS_TOKEN_ENV
                )));
            }
        }

        Ok(())
    }

    pub fn import_settings(&self) -> ImportSettings {
        ImportSettings {
            inbox: self.zones.inbox.clone(),
            archive: self.zones.archive.clone(),
            output: self.zones.output.clone(),
            dataset_name: self.artifacts.dataset_name.clone(),
            manifest_name: self.artifacts.manifest_name.clone(),
            lease_name: self.artifacts.lease_name.clone(),
            fetch_concurrency: self.fetch_concurrency,
            lease_ttl: Duration::from_secs(self.lease_ttl_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
        )
    }

    pub fn normalizer(&self) -> TableNormalizer {
        TableNormalizer::new(self.provenance_columns)
    }

    pub fn merge_engine(&self) -> MergeEngine {
        MergeEngine::new(self.reimport_policy)
    }
}

fn parse_number<T: std::str::FromStr>(prefix: &str, key: &str, value: &str) -> Result<T, AppError> {
    value
        .parse::<T>()
        .map_err(|_| AppError::Config(format!("{}{} must be an unsigned integer", prefix, key)))
}

fn parse_bool(prefix: &str, key: &str, value: &str) -> Result<bool, AppError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Ok(true),
        "0" | "false" | "no" | "n" => Ok(false),
        _ => Err(AppError::Config(format!(
            "{}{} must be a boolean (true/false/1/0)",
            prefix, key
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend, BackendKind::Local);
        assert_eq!(config.import_settings(), ImportSettings::default());
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = Config::from_toml(
            r#"
            backend = "drive"
            provenance_columns = true
            reimport_policy = "supersede"
            fetch_concurrency = 8

            [zones]
            inbox = "1AbcInbox"
            archive = "1AbcArchive"
            output = "1AbcOutput"

            [retry]
            max_attempts = 6
            "#,
        )
        .expect("parse");

        assert_eq!(config.backend, BackendKind::Drive);
        assert_eq!(config.zones.inbox, "1AbcInbox");
        assert_eq!(config.reimport_policy, ReimportPolicy::Supersede);
        assert_eq!(config.retry.max_attempts, 6);
        // Untouched sections keep their defaults
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.artifacts.dataset_name, "merged.csv");
        assert_eq!(config.drive.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            Config::from_toml("inbox_folder = \"x\""),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn token_cannot_come_from_file() {
        let result = Config::from_toml("[drive]\naccess_token = \"ya29.x\"");
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        config
            .apply_env_with(env(&[
                ("INBOX_IMPORT_BACKEND", "drive"),
                ("DRIVE_ACCESS_TOKEN", " ya29.token "),
                ("INBOX_IMPORT_INBOX", "raw"),
                ("INBOX_IMPORT_RETRY_ATTEMPTS", "2"),
                ("INBOX_IMPORT_PROVENANCE_COLUMNS", "yes"),
                ("INBOX_IMPORT_REIMPORT_POLICY", "supersede"),
                ("INBOX_IMPORT_HISTORY_DB", ""),
                ("INBOX_IMPORT_ARCHIVE", "   "),
            ]))
            .expect("apply");

        assert_eq!(config.backend, BackendKind::Drive);
        assert_eq!(
            config
                .drive
                .access_token
                .as_ref()
                .map(|t| t.expose_secret().to_string()),
            Some("ya29.token".to_string())
        );
        assert_eq!(config.zones.inbox, "raw");
        assert_eq!(config.zones.archive, "archive");
        assert_eq!(config.retry.max_attempts, 2);
        assert!(config.provenance_columns);
        assert_eq!(config.reimport_policy, ReimportPolicy::Supersede);
        assert!(config.history_db.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_env_values_are_config_errors() {
        let mut config = Config::default();
        assert!(matches!(
            config.apply_env_with(env(&[("INBOX_IMPORT_FETCH_CONCURRENCY", "many")])),
            Err(AppError::Config(msg)) if msg.contains("INBOX_IMPORT_FETCH_CONCURRENCY")
        ));
        assert!(matches!(
            config.apply_env_with(env(&[("INBOX_IMPORT_BACKEND", "s3")])),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn validation_rejects_bad_setups() {
        let mut config = Config::default();
        config.zones.archive = "inbox".into();
        assert!(matches!(config.validate(), Err(AppError::Config(msg)) if msg.contains("inbox and archive")));

        let mut config = Config::default();
        config.zones.output = " ".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reimport_policy = ReimportPolicy::Supersede;
        assert!(matches!(config.validate(), Err(AppError::Config(msg)) if msg.contains("provenance")));

        let mut config = Config::default();
        config.artifacts.lease_name = "merged.csv".into();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backend = BackendKind::Drive;
        assert!(matches!(config.validate(), Err(AppError::Config(msg)) if msg.contains(ACCESS_TOKEN_ENV)));
    }

    #[test]
    fn debug_redacts_token() {
        let mut config = Config::default();
        config.drive.access_token = Some(SecretString::from("ya29.secret".to_string()));
        let debug = format!("{:?}", config);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("ya29.secret"));
    }
}
