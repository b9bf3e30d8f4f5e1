//! Operator credential handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use validator::Validate;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::PinService;
use crate::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct SetPinRequest {
    #[validate(length(min = 4, max = 8, message = "PIN must be 4 to 8 digits"))]
    pub pin: String,
}

/// Set or replace the caller's workflow PIN
pub async fn set_own_pin(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<SetPinRequest>,
) -> AppResult<StatusCode> {
    input.validate()?;
    PinService::new(state.db)
        .set_pin(current_user.0.business_id, current_user.0.user_id, &input.pin)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
