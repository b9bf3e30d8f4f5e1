//! Audit trail handlers

use axum::{
    extract::{Path, State},
    Json,
};
use shared::{AuditEntry, EntityType};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::{ClientOrigin, CurrentUser};
use crate::services::{AuditService, DispatchService, IntakeService, OperatorContext};
use crate::AppState;

/// Audit entries of an intake or dispatch, oldest first
pub async fn list_audit_entries(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    Path((entity_type, entity_id)): Path<(String, Uuid)>,
) -> AppResult<Json<Vec<AuditEntry>>> {
    current_user.0.require("audit", "read")?;
    let entity_type = EntityType::from_str(&entity_type).ok_or_else(|| AppError::Validation {
        field: "entity_type".to_string(),
        message: "Must be intake or dispatch".to_string(),
    })?;

    // Tank scope of the entity applies to its trail too
    let ctx = OperatorContext::new(&current_user.0, &origin);
    match entity_type {
        EntityType::Intake => {
            IntakeService::new(state.db.clone(), state.policy)
                .get(&ctx, entity_id)
                .await?;
        }
        EntityType::Dispatch => {
            DispatchService::new(state.db.clone(), state.policy)
                .get(&ctx, entity_id)
                .await?;
        }
    }

    let entries = AuditService::new(state.db)
        .list_entries(ctx.business_id, entity_type, entity_id)
        .await?;
    Ok(Json(entries))
}
