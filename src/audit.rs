/// Audit trail of administrative changes and dispatched alerts.
///
/// Recording is best effort: `record` logs a store failure and returns, so
/// a broken audit table never fails the operation being audited.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::logging::{self, Component};
use crate::store::{PoolStore, StoreError};

/// Most entries `list_audit` will return.
pub const AUDIT_LIST_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditAction {
    CreatePool,
    UpdatePool,
    UpdateThresholds,
    AlertSent,
    AlertDeliveryFailed,
}

impl AuditAction {
    pub fn code(&self) -> &'static str {
        match self {
            AuditAction::CreatePool => "CREATE_POOL",
            AuditAction::UpdatePool => "UPDATE_POOL",
            AuditAction::UpdateThresholds => "UPDATE_THRESHOLDS",
            AuditAction::AlertSent => "ALERT_SENT",
            AuditAction::AlertDeliveryFailed => "ALERT_DELIVERY_FAILED",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "CREATE_POOL" => Some(AuditAction::CreatePool),
            "UPDATE_POOL" => Some(AuditAction::UpdatePool),
            "UPDATE_THRESHOLDS" => Some(AuditAction::UpdateThresholds),
            "ALERT_SENT" => Some(AuditAction::AlertSent),
            "ALERT_DELIVERY_FAILED" => Some(AuditAction::AlertDeliveryFailed),
            _ => None,
        }
    }

    /// Functional area shown next to the action.
    pub fn module(&self) -> &'static str {
        match self {
            AuditAction::CreatePool | AuditAction::UpdatePool => "Pools",
            AuditAction::UpdateThresholds => "Thresholds",
            AuditAction::AlertSent | AuditAction::AlertDeliveryFailed => "Alerts",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub id: String,
    /// `None` for entries written by the system itself.
    pub user_id: Option<String>,
    pub action: AuditAction,
    pub module: String,
    pub detail: String,
    pub pool_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        user_id: Option<&str>,
        action: AuditAction,
        detail: impl Into<String>,
        pool_id: Option<&str>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.map(String::from),
            action,
            module: action.module().to_string(),
            detail: detail.into(),
            pool_id: pool_id.map(String::from),
            recorded_at,
        }
    }
}

/// Writes `entry`, logging instead of failing if the store rejects it.
pub fn record<S: PoolStore + ?Sized>(store: &S, entry: AuditEntry) {
    if let Err(e) = store.record_audit(&entry) {
        logging::error(
            Component::Store,
            entry.pool_id.as_deref(),
            &format!("failed to record audit entry {}: {}", entry.action, e),
        );
    }
}

/// Newest entries first. `limit` defaults to, and is capped at,
/// [`AUDIT_LIST_LIMIT`].
pub fn recent<S: PoolStore + ?Sized>(
    store: &S,
    limit: Option<usize>,
) -> Result<Vec<AuditEntry>, StoreError> {
    let limit = limit.unwrap_or(AUDIT_LIST_LIMIT).min(AUDIT_LIST_LIMIT);
    store.list_audit(limit)
}
