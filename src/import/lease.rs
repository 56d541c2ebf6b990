//! Exclusive import lease stored as a small JSON file in the output zone.
//!
//! Storage backends here offer no conditional writes, so ownership is
//! confirmed by reading the lease back after writing it. Leases carry a TTL
//! so a crashed holder never blocks imports forever.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::gateway::{read_named, StorageGateway};

/// Lease file contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseInfo {
    pub holder_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub operation: String,
}

impl LeaseInfo {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns the remaining TTL, or zero if expired.
    pub fn remaining_ttl(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// A held lease. Call [`ImportLease::release`] when done; an unreleased
/// lease simply expires.
pub struct ImportLease {
    gateway: Arc<dyn StorageGateway>,
    folder: String,
    name: String,
    ttl: chrono::Duration,
    info: LeaseInfo,
    refreshed_at: DateTime<Utc>,
}

impl std::fmt::Debug for ImportLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportLease")
            .field("folder", &self.folder)
            .field("name", &self.name)
            .field("info", &self.info)
            .finish()
    }
}

impl ImportLease {
    /// Takes the lease `name` in `folder` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LeaseHeld` if another holder's lease has not
    /// expired, or if a concurrent writer won the race.
    pub async fn acquire(
        gateway: Arc<dyn StorageGateway>,
        folder: &str,
        name: &str,
        ttl: Duration,
        operation: &str,
    ) -> Result<Self, AppError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| AppError::Config("lease TTL is out of range".into()))?;

        if let Some(current) = read_lease(gateway.as_ref(), folder, name).await? {
            if !current.is_expired() {
                return Err(AppError::LeaseHeld {
                    holder_id: current.holder_id,
                    expires_at: current.expires_at.to_rfc3339(),
                });
            }
            debug!(holder = %current.holder_id, "[LEASE] Taking over expired lease");
        }

        let now = Utc::now();
        let info = LeaseInfo {
            holder_id: format!("import-{}", Uuid::new_v4()),
            acquired_at: now,
            expires_at: now + ttl,
            operation: operation.to_string(),
        };
        write_lease(gateway.as_ref(), folder, name, &info).await?;

        // Last writer wins; confirm it was us
        match read_lease(gateway.as_ref(), folder, name).await? {
            Some(stored) if stored.holder_id == info.holder_id => {}
            Some(stored) => {
                return Err(AppError::LeaseHeld {
                    holder_id: stored.holder_id,
                    expires_at: stored.expires_at.to_rfc3339(),
                })
            }
            None => {
                return Err(AppError::TransientStorage(format!(
                    "{} disappeared right after it was written",
                    name
                )))
            }
        }

        info!("[LEASE] Acquired {} as {}", name, info.holder_id);
        Ok(Self {
            gateway,
            folder: folder.to_string(),
            name: name.to_string(),
            ttl,
            info,
            refreshed_at: now,
        })
    }

    /// Returns the stored lease if it is still live. Never writes.
    pub async fn inspect(
        gateway: &dyn StorageGateway,
        folder: &str,
        name: &str,
    ) -> Result<Option<LeaseInfo>, AppError> {
        Ok(read_lease(gateway, folder, name)
            .await?
            .filter(|info| !info.is_expired()))
    }

    pub fn info(&self) -> &LeaseInfo {
        &self.info
    }

    /// Extends the lease once half its TTL has passed since the last refresh.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LeaseHeld` if another run took the lease over after
    /// it expired. The caller must stop touching the output zone.
    pub async fn keep_alive(&mut self) -> Result<(), AppError> {
        let now = Utc::now();
        if now < self.refreshed_at + self.ttl / 2 {
            return Ok(());
        }
        if let Some(stored) = read_lease(self.gateway.as_ref(), &self.folder, &self.name).await? {
            if stored.holder_id != self.info.holder_id {
                warn!(holder = %stored.holder_id, "[LEASE] Lost {} to another run", self.name);
                return Err(AppError::LeaseHeld {
                    holder_id: stored.holder_id,
                    expires_at: stored.expires_at.to_rfc3339(),
                });
            }
        }
        let info = LeaseInfo {
            expires_at: now + self.ttl,
            ..self.info.clone()
        };
        write_lease(self.gateway.as_ref(), &self.folder, &self.name, &info).await?;
        self.info = info;
        self.refreshed_at = now;
        debug!(expires_at = %self.info.expires_at, "[LEASE] Refreshed");
        Ok(())
    }

    /// Releases the lease by writing it back already expired. A lease that
    /// now belongs to another run is left alone.
    pub async fn release(self) -> Result<(), AppError> {
        match read_lease(self.gateway.as_ref(), &self.folder, &self.name).await? {
            Some(stored) if stored.holder_id == self.info.holder_id => {}
            Some(stored) => {
                warn!(holder = %stored.holder_id, "[LEASE] {} is held by another run, not releasing", self.name);
                return Ok(());
            }
            None => return Ok(()),
        }
        let info = LeaseInfo {
            expires_at: Utc::now(),
            ..self.info.clone()
        };
        write_lease(self.gateway.as_ref(), &self.folder, &self.name, &info).await?;
        info!("[LEASE] Released {}", self.name);
        Ok(())
    }
}

async fn read_lease(
    gateway: &dyn StorageGateway,
    folder: &str,
    name: &str,
) -> Result<Option<LeaseInfo>, AppError> {
    let Some(bytes) = read_named(gateway, folder, name)
        .await
        .map_err(|e| e.in_zone("output"))?
    else {
        return Ok(None);
    };
    match serde_json::from_slice::<LeaseInfo>(&bytes) {
        Ok(info) => Ok(Some(info)),
        Err(e) => {
            // An unreadable lease protects nobody
            warn!("[LEASE] Ignoring unreadable {}: {}", name, e);
            Ok(None)
        }
    }
}

async fn write_lease(
    gateway: &dyn StorageGateway,
    folder: &str,
    name: &str,
    info: &LeaseInfo,
) -> Result<(), AppError> {
    let bytes = serde_json::to_vec_pretty(info)
        .map_err(|e| AppError::Internal(format!("Failed to encode lease: {}", e)))?;
    gateway
        .write(folder, name, bytes)
        .await
        .map_err(|e| e.in_zone("output"))?;
    Ok(())
}
