use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{throttle, user_id};
use crate::errors::AppError;
use crate::models::{Slot, UserId, WorkHour};
use crate::services::rate_limit::ActionKind;
use crate::state::AppState;

fn require_owner(caller: UserId, provider_id: UserId) -> Result<(), AppError> {
    if caller != provider_id {
        return Err(AppError::Forbidden("only the provider can change its work hours".into()));
    }
    Ok(())
}

// GET /api/providers/:id/slots?date=YYYY-MM-DD
#[derive(Deserialize)]
pub struct SlotsQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Serialize)]
pub struct SlotView {
    slot: Slot,
    starts: String,
}

#[derive(Serialize)]
pub struct SlotsResponse {
    provider_id: UserId,
    date: NaiveDate,
    slots: Vec<SlotView>,
}

pub async fn available_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider_id): Path<UserId>,
    Query(q): Query<SlotsQuery>,
) -> Result<Json<SlotsResponse>, AppError> {
    let caller = user_id(&headers)?;
    throttle(&state, caller, ActionKind::SlotSearch)?;

    let date = q.date.unwrap_or_else(|| state.engine.clock().today());
    let slots = state
        .engine
        .get_available_slots(provider_id, date)?
        .into_iter()
        .map(|slot| SlotView {
            slot,
            starts: slot.to_string(),
        })
        .collect();

    Ok(Json(SlotsResponse {
        provider_id,
        date,
        slots,
    }))
}

// GET /api/providers/:id/work-hours
pub async fn work_hours(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider_id): Path<UserId>,
) -> Result<Json<Vec<WorkHour>>, AppError> {
    user_id(&headers)?;
    Ok(Json(state.engine.get_work_hours(provider_id)?))
}

// POST /api/providers/:id/work-hours/init
pub async fn init_work_hours(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider_id): Path<UserId>,
) -> Result<(StatusCode, Json<Vec<WorkHour>>), AppError> {
    require_owner(user_id(&headers)?, provider_id)?;
    state.engine.init_work_hours(provider_id).await?;
    Ok((StatusCode::CREATED, Json(state.engine.get_work_hours(provider_id)?)))
}

// POST /api/providers/:id/work-hours/:slot/toggle
#[derive(Serialize)]
pub struct ToggleResponse {
    slot: Slot,
    enabled: bool,
}

pub async fn toggle_work_hour(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((provider_id, slot)): Path<(UserId, u8)>,
) -> Result<Json<ToggleResponse>, AppError> {
    let caller = user_id(&headers)?;
    require_owner(caller, provider_id)?;
    throttle(&state, caller, ActionKind::AvailabilityToggle)?;

    let slot = Slot::try_from(slot).map_err(|e| AppError::Validation(e.to_string()))?;
    let enabled = state.engine.toggle_work_hour(provider_id, slot).await?;
    Ok(Json(ToggleResponse { slot, enabled }))
}

// GET /api/providers/:id/rating
#[derive(Serialize)]
pub struct RatingSummary {
    provider_id: UserId,
    average: f64,
    count: i64,
}

pub async fn rating_summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(provider_id): Path<UserId>,
) -> Result<Json<RatingSummary>, AppError> {
    user_id(&headers)?;
    let (average, count) = state.engine.get_provider_rating(provider_id)?;
    Ok(Json(RatingSummary {
        provider_id,
        average,
        count,
    }))
}
