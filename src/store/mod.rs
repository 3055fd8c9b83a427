/// Persistence for pools, thresholds, readings, subscribers, audit entries
/// and alert dispatch times.
///
/// Submodules:
/// - `memory`: process-local store, used by tests and dry runs.
/// - `pg`: PostgreSQL store used by the service binary.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::alert::ThrottleKey;
use crate::audit::AuditEntry;
use crate::model::{Classification, Pool, PoolReading, PoolThresholds, Subscriber, ThresholdRecord};

pub mod memory;
pub mod pg;

pub use memory::MemoryStore;
pub use pg::PgStore;

/// Errors that can arise when reading or writing stored entities.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An update targeted an entity that does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
    /// A stored column held a value this service cannot interpret.
    #[error("invalid stored value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
    #[error("database error: {0}")]
    Database(#[from] postgres::Error),
    #[error("schema setup failed: {0}")]
    Schema(String),
}

/// Storage operations the service needs.
///
/// Lookups return `Ok(None)` for missing entities; `Err` is reserved for
/// backend failures and updates of missing rows.
pub trait PoolStore: Send + Sync {
    fn insert_pool(&self, pool: &Pool) -> Result<(), StoreError>;
    fn get_pool(&self, pool_id: &str) -> Result<Option<Pool>, StoreError>;
    /// Pools owned by `owner_id`, oldest first.
    fn list_pools(&self, owner_id: &str) -> Result<Vec<Pool>, StoreError>;
    /// Replaces every mutable column of the pool with the same id.
    fn update_pool(&self, pool: &Pool) -> Result<(), StoreError>;
    fn set_pool_status(&self, pool_id: &str, status: Classification) -> Result<(), StoreError>;

    fn get_thresholds(&self, pool_id: &str) -> Result<Option<ThresholdRecord>, StoreError>;
    /// Creates the record at version 1 or bumps the version of an existing one.
    fn upsert_thresholds(
        &self,
        pool_id: &str,
        thresholds: &PoolThresholds,
        modified_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ThresholdRecord, StoreError>;

    fn insert_reading(&self, pool_id: &str, reading: &PoolReading) -> Result<(), StoreError>;
    /// The `limit` most recent readings, returned oldest first.
    fn recent_readings(&self, pool_id: &str, limit: usize) -> Result<Vec<PoolReading>, StoreError>;

    fn get_subscriber(&self, subject_id: &str) -> Result<Option<Subscriber>, StoreError>;
    fn upsert_subscriber(&self, subscriber: &Subscriber) -> Result<(), StoreError>;

    fn record_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;
    /// Newest first, at most `limit` entries.
    fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError>;

    /// Records `now` as the last dispatch for `key` unless the previous one
    /// is less than `window` old, and reports whether it did. The check and
    /// the write happen as one atomic step.
    fn claim_notification_window(
        &self,
        key: &ThrottleKey,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Most recent reading for the pool, if any.
    fn latest_reading(&self, pool_id: &str) -> Result<Option<PoolReading>, StoreError> {
        Ok(self.recent_readings(pool_id, 1)?.pop())
    }
}

impl<S: PoolStore + ?Sized> PoolStore for std::sync::Arc<S> {
    fn insert_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        (**self).insert_pool(pool)
    }
    fn get_pool(&self, pool_id: &str) -> Result<Option<Pool>, StoreError> {
        (**self).get_pool(pool_id)
    }
    fn list_pools(&self, owner_id: &str) -> Result<Vec<Pool>, StoreError> {
        (**self).list_pools(owner_id)
    }
    fn update_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        (**self).update_pool(pool)
    }
    fn set_pool_status(&self, pool_id: &str, status: Classification) -> Result<(), StoreError> {
        (**self).set_pool_status(pool_id, status)
    }
    fn get_thresholds(&self, pool_id: &str) -> Result<Option<ThresholdRecord>, StoreError> {
        (**self).get_thresholds(pool_id)
    }
    fn upsert_thresholds(
        &self,
        pool_id: &str,
        thresholds: &PoolThresholds,
        modified_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ThresholdRecord, StoreError> {
        (**self).upsert_thresholds(pool_id, thresholds, modified_by, now)
    }
    fn insert_reading(&self, pool_id: &str, reading: &PoolReading) -> Result<(), StoreError> {
        (**self).insert_reading(pool_id, reading)
    }
    fn recent_readings(&self, pool_id: &str, limit: usize) -> Result<Vec<PoolReading>, StoreError> {
        (**self).recent_readings(pool_id, limit)
    }
    fn get_subscriber(&self, subject_id: &str) -> Result<Option<Subscriber>, StoreError> {
        (**self).get_subscriber(subject_id)
    }
    fn upsert_subscriber(&self, subscriber: &Subscriber) -> Result<(), StoreError> {
        (**self).upsert_subscriber(subscriber)
    }
    fn record_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        (**self).record_audit(entry)
    }
    fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        (**self).list_audit(limit)
    }
    fn claim_notification_window(
        &self,
        key: &ThrottleKey,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).claim_notification_window(key, window, now)
    }
}
