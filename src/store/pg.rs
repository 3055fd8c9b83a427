/// PostgreSQL-backed [`PoolStore`].
///
/// Uses the synchronous `postgres` client. The client is not `Sync`, so it
/// sits behind a mutex; every trait call holds the lock for one statement.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use postgres::{Client, NoTls, Row};

use super::{PoolStore, StoreError};
use crate::alert::{NotificationMode, ThrottleKey};
use crate::audit::{AuditAction, AuditEntry};
use crate::model::{
    Band, Classification, Pool, PoolReading, PoolThresholds, Subscriber, ThresholdRecord,
};

/// Applied in order by `migrate`. Every statement is idempotent.
const MIGRATIONS: &[(&str, &str)] = &[
    ("001_schema", include_str!("../../sql/001_schema.sql")),
    ("002_throttle_state", include_str!("../../sql/002_throttle_state.sql")),
];

pub struct PgStore {
    client: Mutex<Client>,
}

impl PgStore {
    /// Connect to `database_url` and make sure the schema exists.
    pub fn connect_and_migrate(database_url: &str) -> Result<Self, StoreError> {
        let client = Client::connect(database_url, NoTls)?;
        let store = Self {
            client: Mutex::new(client),
        };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<(), StoreError> {
        let mut client = self.client.lock();
        for (name, sql) in MIGRATIONS {
            client
                .batch_execute(sql)
                .map_err(|e| StoreError::Schema(format!("{}: {}", name, e)))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_status(raw: &str) -> Result<Classification, StoreError> {
    Classification::parse(raw).ok_or_else(|| StoreError::InvalidValue {
        field: "pools.status",
        value: raw.to_string(),
    })
}

fn pool_from_row(row: &Row) -> Result<Pool, StoreError> {
    let status: String = row.get("status");
    Ok(Pool {
        id: row.get("id"),
        name: row.get("name"),
        owner_id: row.get("owner_id"),
        status: parse_status(&status)?,
        volume_m3: row.get("volume_m3"),
        length_m: row.get("length_m"),
        width_m: row.get("width_m"),
        average_depth_m: row.get("average_depth_m"),
        created_at: row.get("created_at"),
    })
}

fn thresholds_from_row(row: &Row) -> ThresholdRecord {
    ThresholdRecord {
        pool_id: row.get("pool_id"),
        thresholds: PoolThresholds {
            ph: Band::new(row.get("ph_min"), row.get("ph_max")),
            free_chlorine: Band::new(row.get("chlorine_min"), row.get("chlorine_max")),
            temperature: Band::new(row.get("temp_min"), row.get("temp_max")),
        },
        version: row.get("version"),
        modified_by: row.get("modified_by"),
        updated_at: row.get("updated_at"),
    }
}

fn reading_from_row(row: &Row) -> PoolReading {
    PoolReading {
        ph: row.get("ph"),
        free_chlorine: row.get("free_chlorine"),
        temperature_c: row.get("temperature_c"),
        measured_at: row.get("taken_at"),
    }
}

fn audit_from_row(row: &Row) -> Result<AuditEntry, StoreError> {
    let code: String = row.get("action");
    let action = AuditAction::from_code(&code).ok_or_else(|| StoreError::InvalidValue {
        field: "audit_log.action",
        value: code.clone(),
    })?;
    Ok(AuditEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        action,
        module: row.get("module"),
        detail: row.get("detail"),
        pool_id: row.get("pool_id"),
        recorded_at: row.get("recorded_at"),
    })
}

fn not_found(entity: &'static str, key: &str) -> StoreError {
    StoreError::NotFound {
        entity,
        key: key.to_string(),
    }
}

// ---------------------------------------------------------------------------
// PoolStore
// ---------------------------------------------------------------------------

impl PoolStore for PgStore {
    fn insert_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        self.client.lock().execute(
            "INSERT INTO pools
                (id, name, owner_id, status, volume_m3, length_m, width_m, average_depth_m, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            &[
                &pool.id,
                &pool.name,
                &pool.owner_id,
                &pool.status.as_str(),
                &pool.volume_m3,
                &pool.length_m,
                &pool.width_m,
                &pool.average_depth_m,
                &pool.created_at,
            ],
        )?;
        Ok(())
    }

    fn get_pool(&self, pool_id: &str) -> Result<Option<Pool>, StoreError> {
        let row = self
            .client
            .lock()
            .query_opt("SELECT * FROM pools WHERE id = $1", &[&pool_id])?;
        row.as_ref().map(pool_from_row).transpose()
    }

    fn list_pools(&self, owner_id: &str) -> Result<Vec<Pool>, StoreError> {
        let rows = self.client.lock().query(
            "SELECT * FROM pools WHERE owner_id = $1 ORDER BY created_at ASC, id ASC",
            &[&owner_id],
        )?;
        rows.iter().map(pool_from_row).collect()
    }

    fn update_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        let updated = self.client.lock().execute(
            "UPDATE pools
             SET name = $2, status = $3, volume_m3 = $4, length_m = $5,
                 width_m = $6, average_depth_m = $7
             WHERE id = $1",
            &[
                &pool.id,
                &pool.name,
                &pool.status.as_str(),
                &pool.volume_m3,
                &pool.length_m,
                &pool.width_m,
                &pool.average_depth_m,
            ],
        )?;
        if updated == 0 {
            return Err(not_found("pool", &pool.id));
        }
        Ok(())
    }

    fn set_pool_status(&self, pool_id: &str, status: Classification) -> Result<(), StoreError> {
        let updated = self.client.lock().execute(
            "UPDATE pools SET status = $2 WHERE id = $1",
            &[&pool_id, &status.as_str()],
        )?;
        if updated == 0 {
            return Err(not_found("pool", pool_id));
        }
        Ok(())
    }

    fn get_thresholds(&self, pool_id: &str) -> Result<Option<ThresholdRecord>, StoreError> {
        let row = self
            .client
            .lock()
            .query_opt("SELECT * FROM thresholds WHERE pool_id = $1", &[&pool_id])?;
        Ok(row.as_ref().map(thresholds_from_row))
    }

    fn upsert_thresholds(
        &self,
        pool_id: &str,
        thresholds: &PoolThresholds,
        modified_by: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ThresholdRecord, StoreError> {
        let row = self.client.lock().query_one(
            "INSERT INTO thresholds
                (pool_id, ph_min, ph_max, chlorine_min, chlorine_max, temp_min, temp_max,
                 version, modified_by, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, $9)
             ON CONFLICT (pool_id) DO UPDATE SET
                ph_min = EXCLUDED.ph_min,
                ph_max = EXCLUDED.ph_max,
                chlorine_min = EXCLUDED.chlorine_min,
                chlorine_max = EXCLUDED.chlorine_max,
                temp_min = EXCLUDED.temp_min,
                temp_max = EXCLUDED.temp_max,
                version = thresholds.version + 1,
                modified_by = EXCLUDED.modified_by,
                updated_at = EXCLUDED.updated_at
             RETURNING *",
            &[
                &pool_id,
                &thresholds.ph.min,
                &thresholds.ph.max,
                &thresholds.free_chlorine.min,
                &thresholds.free_chlorine.max,
                &thresholds.temperature.min,
                &thresholds.temperature.max,
                &modified_by,
                &now,
            ],
        )?;
        Ok(thresholds_from_row(&row))
    }

    fn insert_reading(&self, pool_id: &str, reading: &PoolReading) -> Result<(), StoreError> {
        self.client.lock().execute(
            "INSERT INTO measurements (pool_id, ph, free_chlorine, temperature_c, taken_at)
             VALUES ($1, $2, $3, $4, $5)",
            &[
                &pool_id,
                &reading.ph,
                &reading.free_chlorine,
                &reading.temperature_c,
                &reading.measured_at,
            ],
        )?;
        Ok(())
    }

    fn recent_readings(&self, pool_id: &str, limit: usize) -> Result<Vec<PoolReading>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.client.lock().query(
            "SELECT * FROM (
                SELECT id, ph, free_chlorine, temperature_c, taken_at
                FROM measurements
                WHERE pool_id = $1
                ORDER BY taken_at DESC, id DESC
                LIMIT $2
             ) recent
             ORDER BY taken_at ASC, id ASC",
            &[&pool_id, &limit],
        )?;
        Ok(rows.iter().map(reading_from_row).collect())
    }

    fn get_subscriber(&self, subject_id: &str) -> Result<Option<Subscriber>, StoreError> {
        let row = self
            .client
            .lock()
            .query_opt("SELECT * FROM subscribers WHERE id = $1", &[&subject_id])?;
        Ok(row.map(|row| {
            let mode: String = row.get("notification_mode");
            Subscriber {
                id: row.get("id"),
                email: row.get("email"),
                display_name: row.get("display_name"),
                notification_mode: NotificationMode::from_setting(&mode),
            }
        }))
    }

    fn upsert_subscriber(&self, subscriber: &Subscriber) -> Result<(), StoreError> {
        self.client.lock().execute(
            "INSERT INTO subscribers (id, email, display_name, notification_mode)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE SET
                email = EXCLUDED.email,
                display_name = EXCLUDED.display_name,
                notification_mode = EXCLUDED.notification_mode",
            &[
                &subscriber.id,
                &subscriber.email,
                &subscriber.display_name,
                &subscriber.notification_mode.as_setting(),
            ],
        )?;
        Ok(())
    }

    fn record_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        self.client.lock().execute(
            "INSERT INTO audit_log (id, user_id, action, module, detail, pool_id, recorded_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
            &[
                &entry.id,
                &entry.user_id,
                &entry.action.code(),
                &entry.module,
                &entry.detail,
                &entry.pool_id,
                &entry.recorded_at,
            ],
        )?;
        Ok(())
    }

    fn list_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.client.lock().query(
            "SELECT * FROM audit_log ORDER BY recorded_at DESC LIMIT $1",
            &[&limit],
        )?;
        rows.iter().map(audit_from_row).collect()
    }

    fn claim_notification_window(
        &self,
        key: &ThrottleKey,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // The conflict arm only fires when the stored dispatch is old enough;
        // otherwise no row comes back. Postgres holds the row lock across the
        // check and the write.
        let cutoff = now - window;
        let row = self.client.lock().query_opt(
            "INSERT INTO throttle_state (subject_id, pool_id, mode, last_sent_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (subject_id, pool_id, mode) DO UPDATE
                SET last_sent_at = EXCLUDED.last_sent_at
                WHERE throttle_state.last_sent_at <= $5
             RETURNING last_sent_at",
            &[
                &key.subject_id,
                &key.pool_id,
                &key.mode.as_setting(),
                &now,
                &cutoff,
            ],
        )?;
        Ok(row.is_some())
    }
}
