//! Tank stock and movement ledger handlers

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use shared::{Movement, PaginatedResponse, Pagination, ReplayReport, Tank};
use uuid::Uuid;

use super::date_range;
use crate::error::AppResult;
use crate::middleware::{ClientOrigin, CurrentUser};
use crate::services::{LedgerService, OperatorContext, TankService};
use crate::AppState;

/// List tanks the caller may operate
pub async fn list_tanks(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
) -> AppResult<Json<Vec<Tank>>> {
    current_user.0.require("tanks", "read")?;
    let ctx = OperatorContext::new(&current_user.0, &origin);
    let tanks = TankService::new(state.db).list_tanks(&ctx).await?;
    Ok(Json(tanks))
}

/// Current stock and capacity of a tank
pub async fn get_tank_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    Path(tank_id): Path<Uuid>,
) -> AppResult<Json<Tank>> {
    current_user.0.require("tanks", "read")?;
    let ctx = OperatorContext::new(&current_user.0, &origin);
    let tank = TankService::new(state.db).get_tank(&ctx, tank_id).await?;
    Ok(Json(tank))
}

/// Query parameters for a tank's movements
#[derive(Debug, Deserialize)]
pub struct MovementsQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Ledger rows of a tank, newest first
pub async fn list_movements(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    Path(tank_id): Path<Uuid>,
    Query(query): Query<MovementsQuery>,
) -> AppResult<Json<PaginatedResponse<Movement>>> {
    current_user.0.require("tanks", "read")?;
    let ctx = OperatorContext::new(&current_user.0, &origin);
    let range = date_range(query.start_date, query.end_date)?;
    let pagination = Pagination::from_query(query.page, query.per_page);

    let movements = LedgerService::new(state.db)
        .list_movements(&ctx, tank_id, range, pagination)
        .await?;
    Ok(Json(movements))
}

/// Replay a tank's ledger and compare with its stored stock
pub async fn verify_tank(
    State(state): State<AppState>,
    current_user: CurrentUser,
    origin: ClientOrigin,
    Path(tank_id): Path<Uuid>,
) -> AppResult<Json<ReplayReport>> {
    current_user.0.require("tanks", "read")?;
    let ctx = OperatorContext::new(&current_user.0, &origin);
    let report = LedgerService::new(state.db).verify_tank(&ctx, tank_id).await?;
    Ok(Json(report))
}
