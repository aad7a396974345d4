//! Audit trail for account changes
//!
//! The auth core only emits events; listing them belongs to the admin backend.

use crate::error::AppError;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use serde::Serialize;
use tracing::info;

pub const AUDIT_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS audit_logs (
    id SERIAL PRIMARY KEY,
    actor_email VARCHAR(255) NOT NULL,
    event_type VARCHAR(32) NOT NULL,
    target_id INTEGER,
    created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    UserCreate,
    UserUpdate,
    UserDelete,
    /// Account created on first federated login
    FederatedProvision,
    /// Stored role overwritten from the identity provider
    RoleSync,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::UserCreate => "user_create",
            AuditEvent::UserUpdate => "user_update",
            AuditEvent::UserDelete => "user_delete",
            AuditEvent::FederatedProvision => "federated_provision",
            AuditEvent::RoleSync => "role_sync",
        }
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, actor_email: &str, event: AuditEvent, target_id: Option<i32>) -> Result<(), AppError>;
}

/// Writes audit events to the log only
#[derive(Debug, Clone, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, actor_email: &str, event: AuditEvent, target_id: Option<i32>) -> Result<(), AppError> {
        info!(actor = actor_email, event = event.as_str(), target_id, "audit");
        Ok(())
    }
}

pub struct PostgresAuditSink {
    pool: Pool,
}

impl PostgresAuditSink {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn record(&self, actor_email: &str, event: AuditEvent, target_id: Option<i32>) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO audit_logs (actor_email, event_type, target_id) VALUES ($1, $2, $3)",
                &[&actor_email, &event.as_str(), &target_id],
            )
            .await?;
        Ok(())
    }
}
