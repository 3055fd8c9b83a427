//! Process-local [`PoolStore`].

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use super::{PoolStore, StoreError};
use crate::alert::ThrottleKey;
use crate::audit::AuditEntry;
use crate::model::{Classification, Pool, PoolReading, PoolThresholds, Subscriber, ThresholdRecord};

#[derive(Debug, Default)]
struct Tables {
    pools: HashMap<String, Pool>,
    thresholds: HashMap<String, ThresholdRecord>,
    /// Per pool, in insertion order.
    readings: HashMap<String, Vec<PoolReading>>,
    subscribers: HashMap<String, Subscriber>,
    audit: Vec<AuditEntry>,
    dispatches: HashMap<ThrottleKey, DateTime<Utc>>,
}

/// Keeps everything in memory behind a single read-write lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PoolStore for MemoryStore {
    fn insert_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        self.tables.write().pools.insert(pool.id.clone(), pool.clone());
        Ok(())
    }

    fn get_pool(&self, pool_id: &str) -> Result<Option<Pool>, StoreError> {
        Ok(self.tables.read().pools.get(pool_id).cloned())
    }

    fn list_pools(&self, owner_id: &str) -> Result<Vec<Pool>, StoreError> {
        let tables = self.tables.read();
        let mut pools: Vec<Pool> = tables
            .pools
            .values()
            .filter(|p| p.owner_id == owner_id)
            .cloned()
            .collect();
        pools.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(pools)
    }

    fn update_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        match tables.pools.get_mut(&pool.id) {
            Some(existing) => {
                *existing = pool.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "pool",
                key: pool.id.clone(),
            }),
        }
    }

    fn set_pool_status(&self, pool_id: &str, status: Classification) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        match tables.pools.get_mut(pool_id) {
            Some(pool) => {
                pool.status = status;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "pool",
                key: pool_id.to_string(),
            }),
        }
    }

    fn get_thresholds(&self, pool_id: &str) -> Result<Option<ThresholdRecord>, StoreError> {
        Ok(self.tables.read().thresholds.get(pool_id).cloned())
    }

    fn upsert_thresholds(
        &self,
        pool_id: &str,
        thresholds: &PoolThresholds,
        modified_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ThresholdRecord, StoreError> {
        let mut tables = self.tables.write();
        let version = tables
            .thresholds
            .get(pool_id)
            .map(|existing| existing.version + 1)
            .unwrap_or(1);
        let record = ThresholdRecord {
            pool_id: pool_id.to_string(),
            thresholds: *thresholds,
            version,
            modified_by: modified_by.map(String::from),
            updated_at: now,
        };
        tables.thresholds.insert(pool_id.to_string(), record.clone());
        Ok(record)
    }

    fn insert_reading(&self, pool_id: &str, reading: &PoolReading) -> Result<(), StoreError> {
        self.tables
            .write()
            .readings
            .entry(pool_id.to_string())
            .or_default()
            .push(*reading);
        Ok(())
    }

    fn recent_readings(&self, pool_id: &str, limit: usize) -> Result<Vec<PoolReading>, StoreError> {
        let tables = self.tables.read();
        let Some(readings) = tables.readings.get(pool_id) else {
            return Ok(Vec::new());
        };
        let mut sorted = readings.clone();
        // Stable sort keeps insertion order for equal timestamps.
        sorted.sort_by_key(|r| r.measured_at);
        let skip = sorted.len().saturating_sub(limit);
        Ok(sorted.split_off(skip))
    }

    fn get_subscriber(&self, subject_id: &str) -> Result<Option<Subscriber>, StoreError> {
        Ok(self.tables.read().subscribers.get(subject_id).cloned())
    }

    fn upsert_subscriber(&self, subscriber: &Subscriber) -> Result<(), StoreError> {
        self.tables
            .write()
            .subscribers
            .insert(subscriber.id.clone(), subscriber.clone());
        Ok(())
    }

    fn record_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.tables.write().audit.push(entry.clone());
        Ok(())
    }

    fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let tables = self.tables.read();
        let mut entries = tables.audit.clone();
        entries.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        entries.truncate(limit);
        Ok(entries)
    }

    fn claim_notification_window(
        &self,
        key: &ThrottleKey,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write();
        let open = match tables.dispatches.get(key) {
            Some(&last) => now - last >= window,
            None => true,
        };
        if open {
            tables.dispatches.insert(key.clone(), now);
        }
        Ok(open)
    }
}
