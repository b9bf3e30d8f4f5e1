//! Intake workflow handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use shared::{
    DetailReading, DriverInfo, Intake, IntakeState, NewIntake, NewIntakeDetail, PaginatedResponse,
    Pagination, ReceiptConfirmation,
};
use uuid::Uuid;
use validator::Validate;

use super::{date_range, AnnulRequest, IdempotencyKey, IdempotentCall};
use crate::error::{AppError, AppResult};
use crate::middleware::{ClientOrigin, CurrentUser};
use crate::services::{IntakeFilter, IntakeService, OperatorContext};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateIntakeRequest {
    pub date: NaiveDate,
    #[validate(length(min = 1, max = 120, message = "Supplier is required"))]
    pub supplier_ref: String,
    #[validate(length(min = 1, max = 120, message = "Payment type is required"))]
    pub payment_type_ref: String,
    pub unit_price: Decimal,
    #[validate(length(min = 1, message = "At least one detail is required"))]
    pub details: Vec<NewIntakeDetail>,
}

impl From<CreateIntakeRequest> for NewIntake {
    fn from(input: CreateIntakeRequest) -> Self {
        NewIntake {
            date: input.date,
            supplier_ref: input.supplier_ref,
            payment_type_ref: input.payment_type_ref,
            unit_price: input.unit_price,
            details: input.details,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ConfirmIntakeRequest {
    #[serde(default)]
    pub driver: Option<DriverInfo>,
    #[validate(length(min = 1, message = "A reading is required for every detail"))]
    pub readings: Vec<DetailReading>,
}

impl From<ConfirmIntakeRequest> for ReceiptConfirmation {
    fn from(input: ConfirmIntakeRequest) -> Self {
        ReceiptConfirmation {
            driver: input.driver,
            readings: input.readings,
        }
    }
}

/// Query parameters for listing intakes
#[derive(Debug, Deserialize)]
pub struct ListIntakesQuery {
    pub state: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Register a supplier delivery as PENDING
pub async fn create_intake(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    key: IdempotencyKey,
    Json(input): Json<CreateIntakeRequest>,
) -> AppResult<Response> {
    current_user.0.require("intake", "create")?;
    input.validate()?;

    let ctx = OperatorContext::new(&current_user.0, &origin);
    let call = IdempotentCall::new(
        key,
        ctx.actor_id(),
        "intake.create",
        None,
        &input,
        StatusCode::CREATED,
    )?;
    let service = IntakeService::new(state.db.clone(), state.policy);
    call.run(&state, service.create(&ctx, input.into())).await
}

/// Confirm receipt with meter readings and post the liters
pub async fn confirm_intake(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    key: IdempotencyKey,
    Path(intake_id): Path<Uuid>,
    Json(input): Json<ConfirmIntakeRequest>,
) -> AppResult<Response> {
    current_user.0.require("intake", "confirm")?;
    input.validate()?;

    let ctx = OperatorContext::new(&current_user.0, &origin);
    let call = IdempotentCall::new(
        key,
        ctx.actor_id(),
        "intake.confirm",
        Some(intake_id),
        &input,
        StatusCode::OK,
    )?;
    let service = IntakeService::new(state.db.clone(), state.policy);
    call.run(&state, service.confirm(&ctx, intake_id, input.into()))
        .await
}

/// Annul an intake; an already annulled intake is reported, not rejected
pub async fn annul_intake(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    key: IdempotencyKey,
    Path(intake_id): Path<Uuid>,
    input: Option<Json<AnnulRequest>>,
) -> AppResult<Response> {
    current_user.0.require("intake", "annul")?;
    let input = input.map(|Json(input)| input).unwrap_or_default();
    input.validate()?;

    let ctx = OperatorContext::new(&current_user.0, &origin);
    let call = IdempotentCall::new(
        key,
        ctx.actor_id(),
        "intake.annul",
        Some(intake_id),
        &input,
        StatusCode::OK,
    )?;
    let service = IntakeService::new(state.db.clone(), state.policy);
    call.run(&state, service.annul(&ctx, intake_id, input.reason()))
        .await
}

pub async fn get_intake(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    Path(intake_id): Path<Uuid>,
) -> AppResult<Json<Intake>> {
    current_user.0.require("tanks", "read")?;
    let ctx = OperatorContext::new(&current_user.0, &origin);
    let intake = IntakeService::new(state.db, state.policy)
        .get(&ctx, intake_id)
        .await?;
    Ok(Json(intake))
}

/// List intakes by state and date range
pub async fn list_intakes(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    Query(query): Query<ListIntakesQuery>,
) -> AppResult<Json<PaginatedResponse<Intake>>> {
    current_user.0.require("tanks", "read")?;
    let intake_state = match query.state.as_deref() {
        Some(s) => Some(IntakeState::from_str(s).ok_or_else(|| AppError::Validation {
            field: "state".to_string(),
            message: "Must be pending, finalized or annulled".to_string(),
        })?),
        None => None,
    };
    let filter = IntakeFilter {
        state: intake_state,
        range: date_range(query.start_date, query.end_date)?,
    };

    let ctx = OperatorContext::new(&current_user.0, &origin);
    let intakes = IntakeService::new(state.db, state.policy)
        .list(&ctx, filter, Pagination::from_query(query.page, query.per_page))
        .await?;
    Ok(Json(intakes))
}
