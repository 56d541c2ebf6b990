use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{BackendKind, Config};
use crate::error::AppError;
use crate::gateway::{DriveGateway, LocalGateway, RetryingGateway, StorageGateway};
use crate::import::ImportOrchestrator;
use crate::storage::Database;

/// Shared state handed to every command.
pub struct AppState {
    pub config: Config,
    pub gateway: Arc<dyn StorageGateway>,
    /// `None` when cycle history is disabled.
    pub db: Option<Arc<Database>>,
    /// Cancelled on Ctrl-C; observed between files.
    pub cancel: CancellationToken,
}

impl AppState {
    /// Validates `config`, connects the configured backend, and opens the
    /// history database.
    pub async fn init(config: Config) -> Result<Self, AppError> {
        config.validate()?;
        let gateway = connect_gateway(&config).await?;
        let db = match &config.history_db {
            Some(path) => Some(Arc::new(Database::init(path.clone()).await?)),
            None => None,
        };
        Ok(Self::new(config, gateway, db))
    }

    pub fn new(
        config: Config,
        gateway: Arc<dyn StorageGateway>,
        db: Option<Arc<Database>>,
    ) -> Self {
        Self {
            config,
            gateway,
            db,
            cancel: CancellationToken::new(),
        }
    }

    pub fn orchestrator(&self) -> ImportOrchestrator {
        ImportOrchestrator::new(
            self.gateway.clone(),
            self.config.import_settings(),
            self.config.normalizer(),
            self.config.merge_engine(),
        )
        .with_cancellation(self.cancel.clone())
    }

    /// Returns the history database or a configuration error naming the
    /// missing setting.
    pub fn history(&self) -> Result<&Database, AppError> {
        self.db.as_deref().ok_or_else(|| {
            AppError::Config("cycle history is disabled (history_db is not set)".into())
        })
    }
}

async fn connect_gateway(config: &Config) -> Result<Arc<dyn StorageGateway>, AppError> {
    let policy = config.retry_policy();
    match config.backend {
        BackendKind::Local => {
            let gateway = LocalGateway::new(&config.local.root);
            let zones = [
                ("inbox", &config.zones.inbox),
                ("archive", &config.zones.archive),
                ("output", &config.zones.output),
            ];
            for (zone, folder) in zones {
                gateway
                    .ensure_folder(folder)
                    .await
                    .map_err(|e| e.in_zone(zone))?;
            }
            info!("[STATE] Local backend at {}", gateway.root().display());
            Ok(Arc::new(RetryingGateway::new(gateway, policy)))
        }
        BackendKind::Drive => {
            let token = config.drive.access_token.clone().ok_or_else(|| {
                AppError::Config("the drive backend needs an access token".into())
            })?;
            let gateway = DriveGateway::new(&config.drive.api_base, token)?;
            info!("[STATE] Drive backend at {}", config.drive.api_base);
            Ok(Arc::new(RetryingGateway::new(gateway, policy)))
        }
    }
}
