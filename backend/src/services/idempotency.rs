//! Idempotency-Key storage
//!
//! The first successful response to a mutating request is kept per
//! (actor, key) together with a fingerprint of the request. A retry with the
//! same fingerprint gets the stored response back.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Longest accepted `Idempotency-Key` header value
pub const MAX_KEY_LENGTH: usize = 128;

/// A response recorded for an earlier request
#[derive(Debug, Clone, FromRow)]
pub struct StoredResponse {
    pub fingerprint: String,
    pub status_code: i32,
    pub response: serde_json::Value,
}

/// Fingerprint of operation, target entity and request body
pub fn fingerprint<T: Serialize>(
    operation: &str,
    entity_id: Option<Uuid>,
    body: &T,
) -> AppResult<String> {
    let body = serde_json::to_vec(body)
        .map_err(|e| AppError::Internal(format!("Fingerprint encoding: {}", e)))?;

    let mut hasher = Sha256::new();
    hasher.update(operation.as_bytes());
    hasher.update([0u8]);
    if let Some(id) = entity_id {
        hasher.update(id.as_bytes());
    }
    hasher.update([0u8]);
    hasher.update(&body);
    Ok(STANDARD.encode(hasher.finalize()))
}

/// Reject empty or oversized keys
pub fn validate_key(key: &str) -> AppResult<()> {
    if key.trim().is_empty() || key.len() > MAX_KEY_LENGTH {
        return Err(AppError::Validation {
            field: "Idempotency-Key".to_string(),
            message: format!("Must be 1 to {} characters", MAX_KEY_LENGTH),
        });
    }
    Ok(())
}

#[derive(Clone)]
pub struct IdempotencyService {
    db: PgPool,
    ttl_hours: i64,
}

impl IdempotencyService {
    pub fn new(db: PgPool, ttl_hours: i64) -> Self {
        Self { db, ttl_hours }
    }

    /// Stored response for this key, if still fresh
    ///
    /// A key reused for a different request is a `Conflict`.
    pub async fn lookup(
        &self,
        actor_id: Uuid,
        key: &str,
        fingerprint: &str,
    ) -> AppResult<Option<StoredResponse>> {
        let stored = sqlx::query_as::<_, StoredResponse>(
            r#"
            SELECT fingerprint, status_code, response
            FROM idempotency_keys
            WHERE actor_id = $1 AND key = $2
              AND created_at > NOW() - make_interval(hours => $3::int)
            "#,
        )
        .bind(actor_id)
        .bind(key)
        .bind(self.ttl_hours as i32)
        .fetch_optional(&self.db)
        .await?;

        match stored {
            Some(stored) if stored.fingerprint != fingerprint => Err(AppError::Conflict {
                resource: "Idempotency-Key".to_string(),
                message: "Key was already used for a different request".to_string(),
            }),
            other => Ok(other),
        }
    }

    /// Keep a successful response; an expired entry for the same key is replaced
    pub async fn remember(
        &self,
        actor_id: Uuid,
        key: &str,
        fingerprint: &str,
        status_code: u16,
        response: &serde_json::Value,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_keys (actor_id, key, fingerprint, status_code, response)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (actor_id, key) DO UPDATE
            SET fingerprint = EXCLUDED.fingerprint,
                status_code = EXCLUDED.status_code,
                response = EXCLUDED.response,
                created_at = NOW()
            WHERE idempotency_keys.created_at <= NOW() - make_interval(hours => $6::int)
            "#,
        )
        .bind(actor_id)
        .bind(key)
        .bind(fingerprint)
        .bind(i32::from(status_code))
        .bind(response)
        .bind(self.ttl_hours as i32)
        .execute(&self.db)
        .await?;

        tracing::debug!(%actor_id, key, "Stored idempotent response");
        Ok(())
    }
}
