//! Dispatch workflow handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    CompleteDispatch, Dispatch, DispatchState, OpenDispatch, PaginatedResponse, Pagination,
    Recipient,
};
use uuid::Uuid;
use validator::Validate;

use super::{date_range, AnnulRequest, IdempotencyKey, IdempotentCall};
use crate::error::{AppError, AppResult};
use crate::middleware::{ClientOrigin, CurrentUser};
use crate::services::{DispatchFilter, DispatchService, OperatorContext};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OpenDispatchRequest {
    pub tank_id: Uuid,
    /// Defaults to today
    pub date: Option<NaiveDate>,
    pub recipient: Recipient,
    /// Defaults to the caller
    pub deliverer_id: Option<Uuid>,
    #[serde(skip_serializing)]
    #[validate(length(min = 4, max = 8, message = "PIN must be 4 to 8 digits"))]
    pub deliverer_pin: String,
    pub meter_start: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CompleteDispatchRequest {
    pub receiver_id: Option<Uuid>,
    #[serde(default, skip_serializing)]
    #[validate(length(min = 4, max = 8, message = "PIN must be 4 to 8 digits"))]
    pub receiver_pin: Option<String>,
    pub meter_end: Decimal,
    #[validate(length(min = 1, max = 120, message = "Evidence reference must be 1 to 120 characters"))]
    pub evidence_ref: Option<String>,
}

impl From<CompleteDispatchRequest> for CompleteDispatch {
    fn from(input: CompleteDispatchRequest) -> Self {
        CompleteDispatch {
            receiver_id: input.receiver_id,
            receiver_pin: input.receiver_pin,
            meter_end: input.meter_end,
            evidence_ref: input.evidence_ref,
        }
    }
}

/// Query parameters for listing dispatches
#[derive(Debug, Deserialize)]
pub struct ListDispatchesQuery {
    pub state: Option<String>,
    pub tank_id: Option<Uuid>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Open a dispatch after the deliverer's PIN checks out
pub async fn open_dispatch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    key: IdempotencyKey,
    Json(input): Json<OpenDispatchRequest>,
) -> AppResult<Response> {
    current_user.0.require("dispatch", "open")?;
    input.validate()?;

    let ctx = OperatorContext::new(&current_user.0, &origin);
    let call = IdempotentCall::new(
        key,
        ctx.actor_id(),
        "dispatch.open",
        None,
        &input,
        StatusCode::CREATED,
    )?;
    let open = OpenDispatch {
        tank_id: input.tank_id,
        date: input.date.unwrap_or_else(|| Utc::now().date_naive()),
        recipient: input.recipient,
        deliverer_id: input.deliverer_id.unwrap_or(ctx.actor_id()),
        deliverer_pin: input.deliverer_pin,
        meter_start: input.meter_start,
    };
    let service = DispatchService::new(state.db.clone(), state.policy);
    call.run(&state, service.open(&ctx, open)).await
}

/// Record the closing reading and drain the tank
pub async fn complete_dispatch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    key: IdempotencyKey,
    Path(dispatch_id): Path<Uuid>,
    Json(input): Json<CompleteDispatchRequest>,
) -> AppResult<Response> {
    current_user.0.require("dispatch", "complete")?;
    input.validate()?;

    let ctx = OperatorContext::new(&current_user.0, &origin);
    let call = IdempotentCall::new(
        key,
        ctx.actor_id(),
        "dispatch.complete",
        Some(dispatch_id),
        &input,
        StatusCode::OK,
    )?;
    let service = DispatchService::new(state.db.clone(), state.policy);
    call.run(&state, service.complete(&ctx, dispatch_id, input.into()))
        .await
}

/// Annul a dispatch; an already annulled dispatch is reported, not rejected
pub async fn annul_dispatch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    key: IdempotencyKey,
    Path(dispatch_id): Path<Uuid>,
    input: Option<Json<AnnulRequest>>,
) -> AppResult<Response> {
    current_user.0.require("dispatch", "annul")?;
    let input = input.map(|Json(input)| input).unwrap_or_default();
    input.validate()?;

    let ctx = OperatorContext::new(&current_user.0, &origin);
    let call = IdempotentCall::new(
        key,
        ctx.actor_id(),
        "dispatch.annul",
        Some(dispatch_id),
        &input,
        StatusCode::OK,
    )?;
    let service = DispatchService::new(state.db.clone(), state.policy);
    call.run(&state, service.annul(&ctx, dispatch_id, input.reason()))
        .await
}

pub async fn get_dispatch(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    Path(dispatch_id): Path<Uuid>,
) -> AppResult<Json<Dispatch>> {
    current_user.0.require("tanks", "read")?;
    let ctx = OperatorContext::new(&current_user.0, &origin);
    let dispatch = DispatchService::new(state.db, state.policy)
        .get(&ctx, dispatch_id)
        .await?;
    Ok(Json(dispatch))
}

/// List dispatches by state, tank and date range
pub async fn list_dispatches(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    Query(query): Query<ListDispatchesQuery>,
) -> AppResult<Json<PaginatedResponse<Dispatch>>> {
    current_user.0.require("tanks", "read")?;
    let dispatch_state = match query.state.as_deref() {
        Some(s) => Some(DispatchState::from_str(s).ok_or_else(|| AppError::Validation {
            field: "state".to_string(),
            message: "Must be open, completed or annulled".to_string(),
        })?),
        None => None,
    };
    let filter = DispatchFilter {
        state: dispatch_state,
        tank_id: query.tank_id,
        range: date_range(query.start_date, query.end_date)?,
    };

    let ctx = OperatorContext::new(&current_user.0, &origin);
    let dispatches = DispatchService::new(state.db, state.policy)
        .list(&ctx, filter, Pagination::from_query(query.page, query.per_page))
        .await?;
    Ok(Json(dispatches))
}
