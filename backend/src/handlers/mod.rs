//! HTTP handlers for the Fuel Inventory Ledger API

mod audit;
mod dispatch;
mod health;
mod intake;
mod operator;
mod tank;

pub use audit::*;
pub use dispatch::*;
pub use health::*;
pub use intake::*;
pub use operator::*;
pub use tank::*;

use std::future::Future;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shared::DateRange;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::services::idempotency::{fingerprint, validate_key, IdempotencyService};
use crate::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENT_REPLAY_HEADER: &str = "idempotent-replay";

/// Optional `Idempotency-Key` header of a mutating request
#[derive(Debug, Clone, Default)]
pub struct IdempotencyKey(pub Option<String>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(IDEMPOTENCY_KEY_HEADER) else {
            return Ok(IdempotencyKey(None));
        };
        let key = value.to_str().map_err(|_| AppError::Validation {
            field: "Idempotency-Key".to_string(),
            message: "Must be visible ASCII".to_string(),
        })?;
        validate_key(key)?;
        Ok(IdempotencyKey(Some(key.to_string())))
    }
}

/// A mutating call whose first successful response can be replayed
pub struct IdempotentCall {
    actor_id: Uuid,
    key: Option<String>,
    fingerprint: String,
    status: StatusCode,
}

impl IdempotentCall {
    pub fn new<B: Serialize>(
        key: IdempotencyKey,
        actor_id: Uuid,
        operation: &str,
        entity_id: Option<Uuid>,
        body: &B,
        status: StatusCode,
    ) -> AppResult<Self> {
        let fingerprint = match key.0 {
            Some(_) => fingerprint(operation, entity_id, body)?,
            None => String::new(),
        };
        Ok(Self {
            actor_id,
            key: key.0,
            fingerprint,
            status,
        })
    }

    /// Replay the stored response for this key, or run the operation and store its result
    pub async fn run<T, F>(self, state: &AppState, operation: F) -> AppResult<Response>
    where
        T: Serialize,
        F: Future<Output = AppResult<T>>,
    {
        let Some(key) = self.key else {
            return Ok((self.status, Json(operation.await?)).into_response());
        };

        let service =
            IdempotencyService::new(state.db.clone(), state.config.ledger.idempotency_ttl_hours);
        if let Some(stored) = service.lookup(self.actor_id, &key, &self.fingerprint).await? {
            tracing::debug!(actor_id = %self.actor_id, key = %key, "Replaying idempotent response");
            let status = u16::try_from(stored.status_code)
                .ok()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or(StatusCode::OK);
            let mut response = (status, Json(stored.response)).into_response();
            response
                .headers_mut()
                .insert(IDEMPOTENT_REPLAY_HEADER, HeaderValue::from_static("true"));
            return Ok(response);
        }

        let value = serde_json::to_value(operation.await?)
            .map_err(|e| AppError::Internal(format!("Response encoding: {}", e)))?;
        service
            .remember(
                self.actor_id,
                &key,
                &self.fingerprint,
                self.status.as_u16(),
                &value,
            )
            .await?;
        Ok((self.status, Json(value)).into_response())
    }
}

/// Body of the annul endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AnnulRequest {
    #[validate(length(max = 500, message = "Reason must be at most 500 characters"))]
    pub reason: Option<String>,
}

impl AnnulRequest {
    pub fn reason(self) -> Option<String> {
        self.reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
    }
}

/// Inclusive date range from optional query bounds, given together or not at all
pub(crate) fn date_range(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> AppResult<Option<DateRange>> {
    match (start, end) {
        (None, None) => Ok(None),
        (Some(start), Some(end)) => Ok(Some(DateRange { start, end })),
        _ => Err(AppError::Validation {
            field: "start_date".to_string(),
            message: "start_date and end_date must be given together".to_string(),
        }),
    }
}
