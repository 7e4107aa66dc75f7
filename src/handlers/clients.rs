use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use super::user_id;
use crate::errors::AppError;
use crate::models::{Booking, Penalty, UserId};
use crate::state::AppState;

fn require_self(headers: &HeaderMap, client_id: UserId) -> Result<(), AppError> {
    if user_id(headers)? != client_id {
        return Err(AppError::Forbidden("clients can only see their own bookings".into()));
    }
    Ok(())
}

// GET /api/clients/:id/active
#[derive(Serialize)]
pub struct ClientStatus {
    active: Option<Booking>,
    draft: Option<Booking>,
    today: Option<Booking>,
    unrated: Option<Booking>,
    penalties_today: i64,
}

pub async fn active(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(client_id): Path<UserId>,
) -> Result<Json<ClientStatus>, AppError> {
    require_self(&headers, client_id)?;

    let engine = &state.engine;
    let today = engine.clock().today();
    Ok(Json(ClientStatus {
        active: engine.get_active_booking(client_id)?,
        draft: engine.get_client_draft(client_id)?,
        today: engine.get_today_usage(client_id, today)?,
        unrated: engine.get_unrated_done(client_id)?,
        penalties_today: engine.count_penalties(client_id, today)?,
    }))
}

// GET /api/clients/:id/penalties
pub async fn penalties(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(client_id): Path<UserId>,
) -> Result<Json<Vec<Penalty>>, AppError> {
    require_self(&headers, client_id)?;
    Ok(Json(state.engine.get_penalties(client_id)?))
}
