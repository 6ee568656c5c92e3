//! Audit sink for security-relevant actions.
//!
//! Recording is a side effect: callers log sink failures and carry on.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use tracing::warn;

use crate::auth::AuthError;
use crate::uuid::uuidv7;

/// One audit log line.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    /// e.g. `CREATE`, `REVOKE`, `UPDATE`.
    pub action: String,
    /// e.g. `Impersonation`, `PasswordReset`.
    pub entity: String,
    pub entity_id: String,
    pub actor_id: Option<String>,
    pub metadata: Value,
}

impl AuditEntry {
    pub fn new(action: &str, entity: &str, entity_id: &str, actor_id: Option<&str>) -> Self {
        Self {
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            actor_id: actor_id.map(str::to_string),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuthError>;
}

/// Record without letting a sink failure reach the caller.
pub async fn record_quietly(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action.clone();
    let entity = entry.entity.clone();
    if let Err(e) = sink.record(entry).await {
        warn!(%action, %entity, error = %e, "failed to record audit log");
    }
}

/// Audit sink writing to the `audit_logs` table.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), AuthError> {
        sqlx::query(
            "INSERT INTO audit_logs (id, action, entity, entity_id, actor_id, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(uuidv7())
        .bind(&entry.action)
        .bind(&entry.entity)
        .bind(&entry.entity_id)
        .bind(entry.actor_id.as_deref())
        .bind(&entry.metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
