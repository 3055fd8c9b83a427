//! Pool administration: creation, edits and threshold management.
//!
//! Every operation is scoped to the calling owner. A pool that exists but
//! belongs to someone else is reported exactly like a missing one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::{self, AuditAction, AuditEntry};
use crate::model::{Classification, Pool, PoolReading, PoolThresholds, ThresholdRecord};
use crate::store::{PoolStore, StoreError};

/// Number of readings returned by `history` when the caller does not ask
/// for a specific window.
pub const DEFAULT_HISTORY_WINDOW: usize = 30;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool name must not be empty")]
    EmptyName,
    #[error("pool not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Edits applied by `update_pool`.
///
/// `name: None` keeps the current name. The dimension fields always replace
/// the stored values, so `None` clears them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolUpdate {
    pub name: Option<String>,
    pub volume_m3: Option<f64>,
    pub length_m: Option<f64>,
    pub width_m: Option<f64>,
    pub average_depth_m: Option<f64>,
}

pub struct PoolService<S: PoolStore> {
    store: Arc<S>,
    default_thresholds: PoolThresholds,
}

impl<S: PoolStore> PoolService<S> {
    pub fn new(store: Arc<S>, default_thresholds: PoolThresholds) -> Self {
        Self {
            store,
            default_thresholds,
        }
    }

    fn owned_pool(&self, owner_id: &str, pool_id: &str) -> Result<Pool, PoolError> {
        match self.store.get_pool(pool_id)? {
            Some(pool) if pool.owner_id == owner_id => Ok(pool),
            _ => Err(PoolError::NotFound(pool_id.to_string())),
        }
    }

    /// Creates a pool with status `Ok` and the default thresholds.
    pub fn create_pool(&self, owner_id: &str, name: &str) -> Result<Pool, PoolError> {
        self.create_pool_at(owner_id, name, Utc::now())
    }

    pub fn create_pool_at(
        &self,
        owner_id: &str,
        name: &str,
        now: DateTime<Utc>,
    ) -> Result<Pool, PoolError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PoolError::EmptyName);
        }

        let pool = Pool {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            status: Classification::Ok,
            volume_m3: None,
            length_m: None,
            width_m: None,
            average_depth_m: None,
            created_at: now,
        };
        self.store.insert_pool(&pool)?;
        self.store
            .upsert_thresholds(&pool.id, &self.default_thresholds, Some(owner_id), now)?;

        audit::record(
            &*self.store,
            AuditEntry::new(
                Some(owner_id),
                AuditAction::CreatePool,
                format!("Created pool \"{}\"", pool.name),
                Some(&pool.id),
                now,
            ),
        );
        tracing::info!(component = "store", pool = %pool.id, owner = owner_id, "Pool created");

        Ok(pool)
    }

    pub fn list_pools(&self, owner_id: &str) -> Result<Vec<Pool>, PoolError> {
        Ok(self.store.list_pools(owner_id)?)
    }

    pub fn get_pool(&self, owner_id: &str, pool_id: &str) -> Result<Pool, PoolError> {
        self.owned_pool(owner_id, pool_id)
    }

    pub fn update_pool(
        &self,
        owner_id: &str,
        pool_id: &str,
        update: PoolUpdate,
    ) -> Result<Pool, PoolError> {
        let mut pool = self.owned_pool(owner_id, pool_id)?;

        if let Some(name) = update.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(PoolError::EmptyName);
            }
            pool.name = name.to_string();
        }
        pool.volume_m3 = update.volume_m3;
        pool.length_m = update.length_m;
        pool.width_m = update.width_m;
        pool.average_depth_m = update.average_depth_m;

        self.store.update_pool(&pool)?;
        audit::record(
            &*self.store,
            AuditEntry::new(
                Some(owner_id),
                AuditAction::UpdatePool,
                format!("Updated pool \"{}\"", pool.name),
                Some(&pool.id),
                Utc::now(),
            ),
        );
        Ok(pool)
    }

    /// Stored thresholds, or `None` if the pool has never had any.
    pub fn load_thresholds(
        &self,
        owner_id: &str,
        pool_id: &str,
    ) -> Result<Option<ThresholdRecord>, PoolError> {
        let pool = self.owned_pool(owner_id, pool_id)?;
        Ok(self.store.get_thresholds(&pool.id)?)
    }

    pub fn save_thresholds(
        &self,
        owner_id: &str,
        pool_id: &str,
        thresholds: PoolThresholds,
    ) -> Result<ThresholdRecord, PoolError> {
        let pool = self.owned_pool(owner_id, pool_id)?;
        let now = Utc::now();
        let record = self
            .store
            .upsert_thresholds(&pool.id, &thresholds, Some(owner_id), now)?;

        audit::record(
            &*self.store,
            AuditEntry::new(
                Some(owner_id),
                AuditAction::UpdateThresholds,
                format!("Updated thresholds of pool \"{}\" (version {})", pool.name, record.version),
                Some(&pool.id),
                now,
            ),
        );
        Ok(record)
    }

    /// Most recent `limit` readings, oldest first.
    pub fn history(
        &self,
        owner_id: &str,
        pool_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PoolReading>, PoolError> {
        let pool = self.owned_pool(owner_id, pool_id)?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_WINDOW);
        Ok(self.store.recent_readings(&pool.id, limit)?)
    }
}
