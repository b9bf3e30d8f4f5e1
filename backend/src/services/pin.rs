//! Operator PIN credentials
//!
//! PINs are stored as bcrypt hashes in `operator_credentials` and checked
//! through the `PinVerifier` capability the workflows expect.

use std::collections::HashMap;

use bcrypt::{hash, verify, DEFAULT_COST};
use shared::{validate_pin_format, PinVerifier};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// PIN hashes for the operators taking part in one transition
#[derive(Debug, Default)]
pub struct CredentialSet {
    hashes: HashMap<Uuid, String>,
}

impl CredentialSet {
    pub async fn load(
        conn: &mut PgConnection,
        business_id: Uuid,
        user_ids: &[Uuid],
    ) -> AppResult<Self> {
        if user_ids.is_empty() {
            return Ok(Self::default());
        }

        let rows = sqlx::query_as::<_, (Uuid, String)>(
            r#"
            SELECT user_id, pin_hash
            FROM operator_credentials
            WHERE business_id = $1 AND user_id = ANY($2)
            "#,
        )
        .bind(business_id)
        .bind(user_ids)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Self {
            hashes: rows.into_iter().collect(),
        })
    }
}

impl PinVerifier for CredentialSet {
    fn verify(&self, actor_id: Uuid, pin: &str) -> bool {
        self.hashes
            .get(&actor_id)
            .map(|stored| verify(pin, stored).unwrap_or(false))
            .unwrap_or(false)
    }
}

/// Manages operator PIN credentials
#[derive(Clone)]
pub struct PinService {
    db: PgPool,
}

impl PinService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Set or replace an operator's PIN
    pub async fn set_pin(&self, business_id: Uuid, user_id: Uuid, pin: &str) -> AppResult<()> {
        validate_pin_format(pin)?;
        let pin_hash =
            hash(pin, DEFAULT_COST).map_err(|e| AppError::Internal(format!("PIN hashing: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO operator_credentials (user_id, business_id, pin_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id)
            DO UPDATE SET pin_hash = EXCLUDED.pin_hash, updated_at = NOW()
            WHERE operator_credentials.business_id = EXCLUDED.business_id
            "#,
        )
        .bind(user_id)
        .bind(business_id)
        .bind(&pin_hash)
        .execute(&self.db)
        .await?;

        tracing::info!(%user_id, "Operator PIN updated");
        Ok(())
    }
}
