//! Audit trail service

use chrono::{DateTime, Utc};
use serde_json::json;
use shared::{Actor, AuditAction, AuditEntry, AuditRecord, EntityType};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Audit service for recording and reading per-entity action logs
#[derive(Clone)]
pub struct AuditService {
    db: PgPool,
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: Uuid,
    entity_type: String,
    entity_id: Uuid,
    action: String,
    actor_id: Uuid,
    ip: Option<String>,
    detail: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_entry(self) -> AppResult<AuditEntry> {
        Ok(AuditEntry {
            id: self.id,
            entity_type: EntityType::from_str(&self.entity_type).ok_or_else(|| {
                AppError::Internal(format!("Unknown entity type {}", self.entity_type))
            })?,
            entity_id: self.entity_id,
            action: AuditAction::from_str(&self.action)
                .ok_or_else(|| AppError::Internal(format!("Unknown audit action {}", self.action)))?,
            actor_id: self.actor_id,
            ip: self.ip,
            detail: self.detail,
            created_at: self.created_at,
        })
    }
}

impl AuditService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Append records inside the caller's transaction
    pub async fn record_all(
        conn: &mut PgConnection,
        business_id: Uuid,
        actor: &Actor,
        records: &[AuditRecord],
    ) -> AppResult<()> {
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO audit_entries (business_id, entity_type, entity_id, action, actor_id, ip, detail)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(business_id)
            .bind(record.entity_type.as_str())
            .bind(record.entity_id)
            .bind(record.action.as_str())
            .bind(actor.id)
            .bind(&actor.ip)
            .bind(&record.detail)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Keep a failed PIN attempt after the workflow transaction rolled back
    pub async fn record_pin_rejection(
        &self,
        business_id: Uuid,
        actor: &Actor,
        entity_type: EntityType,
        entity_id: Uuid,
        rejected_operator: Uuid,
    ) -> AppResult<()> {
        tracing::warn!(
            entity = %entity_type,
            %entity_id,
            %rejected_operator,
            actor = %actor.id,
            "PIN rejected"
        );

        let record = AuditRecord::new(entity_type, entity_id, AuditAction::PinRejected)
            .with_detail(json!({ "operator_id": rejected_operator }));
        let mut conn = self.db.acquire().await?;
        Self::record_all(&mut *conn, business_id, actor, &[record]).await
    }

    /// List audit entries of one entity, oldest first
    pub async fn list_entries(
        &self,
        business_id: Uuid,
        entity_type: EntityType,
        entity_id: Uuid,
    ) -> AppResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, entity_type, entity_id, action, actor_id, ip, detail, created_at
            FROM audit_entries
            WHERE business_id = $1 AND entity_type = $2 AND entity_id = $3
            ORDER BY entry_no ASC
            "#,
        )
        .bind(business_id)
        .bind(entity_type.as_str())
        .bind(entity_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(AuditRow::into_entry).collect()
    }
}
