use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use super::{throttle, user_id};
use crate::errors::AppError;
use crate::models::{Actor, Booking, BookingId, Slot, UserId};
use crate::services::booking::{CancelOutcome, DraftOutcome, RateOutcome};
use crate::services::rate_limit::ActionKind;
use crate::state::AppState;

fn load(state: &AppState, id: BookingId) -> Result<Booking, AppError> {
    state
        .engine
        .get_booking(id)?
        .ok_or_else(|| AppError::NotFound(format!("booking {id}")))
}

// POST /api/bookings/draft
#[derive(Deserialize)]
pub struct DraftRequest {
    pub provider_id: UserId,
    pub date: NaiveDate,
    pub slot: Slot,
}

pub async fn create_draft(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DraftRequest>,
) -> Result<Response, AppError> {
    let client_id = user_id(&headers)?;

    let now = state.engine.clock().local_now();
    if req.slot.seconds_until(req.date, now) < 0 {
        return Err(AppError::Validation(format!(
            "slot {} on {} has already started",
            req.slot, req.date
        )));
    }

    match state
        .engine
        .request_draft(req.provider_id, client_id, req.date, req.slot)
        .await?
    {
        outcome @ DraftOutcome::Created { .. } => {
            Ok((StatusCode::CREATED, Json(outcome)).into_response())
        }
        DraftOutcome::Refused { violation } => Err(violation.into()),
        DraftOutcome::SlotClosed { slot } => Err(AppError::Conflict(format!(
            "slot {slot} is not open for booking"
        ))),
    }
}

// GET /api/bookings/:id
pub async fn get_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<BookingId>,
) -> Result<Json<Booking>, AppError> {
    let caller = user_id(&headers)?;
    let booking = load(&state, id)?;
    if caller != booking.client_id && caller != booking.provider_id {
        return Err(AppError::Forbidden(format!("booking {id} belongs to someone else")));
    }
    Ok(Json(booking))
}

// POST /api/bookings/:id/confirm
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<BookingId>,
) -> Result<Json<Booking>, AppError> {
    let caller = user_id(&headers)?;
    throttle(&state, caller, ActionKind::Confirm)?;

    let draft = load(&state, id)?;
    if draft.client_id != caller {
        return Err(AppError::Forbidden(format!("booking {id} belongs to someone else")));
    }

    if !state.engine.confirm(id).await? {
        return Err(AppError::Conflict("slot taken, choose another".into()));
    }
    Ok(Json(load(&state, id)?))
}

// POST /api/bookings/:id/cancel
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<BookingId>,
) -> Result<Response, AppError> {
    let caller = user_id(&headers)?;
    throttle(&state, caller, ActionKind::Cancel)?;

    // a provider cancelling its own booking acts as the provider
    let actor = match state.engine.get_booking(id)? {
        Some(b) if b.provider_id == caller && b.client_id != caller => Actor::Provider(caller),
        _ => Actor::Client(caller),
    };

    let outcome = state.engine.cancel(id, actor).await?;
    let status = match &outcome {
        CancelOutcome::Cancelled | CancelOutcome::DraftAbandoned => StatusCode::OK,
        CancelOutcome::TooLate { .. } | CancelOutcome::NotCancellable { .. } => {
            StatusCode::CONFLICT
        }
        CancelOutcome::NotParticipant => {
            return Err(AppError::Forbidden(format!("booking {id} belongs to someone else")))
        }
        CancelOutcome::NotFound => return Err(AppError::NotFound(format!("booking {id}"))),
    };
    Ok((status, Json(outcome)).into_response())
}

// POST /api/bookings/:id/done
pub async fn mark_done(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<BookingId>,
) -> Result<Json<Booking>, AppError> {
    let caller = user_id(&headers)?;
    let booking = load(&state, id)?;
    if booking.provider_id != caller {
        return Err(AppError::Forbidden("only the provider can finish a visit".into()));
    }

    if !state.engine.mark_done(id).await? {
        return Err(AppError::Conflict(format!(
            "booking {id} is {}, not confirmed",
            booking.status.as_str()
        )));
    }
    Ok(Json(load(&state, id)?))
}

// POST /api/bookings/:id/rating
#[derive(Deserialize)]
pub struct RateRequest {
    pub stars: u8,
    pub comment: Option<String>,
}

pub async fn rate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<BookingId>,
    Json(req): Json<RateRequest>,
) -> Result<Response, AppError> {
    let caller = user_id(&headers)?;
    let outcome = state
        .engine
        .rate(id, caller, req.stars, req.comment.as_deref())
        .await?;
    Ok(rate_response(outcome))
}

// PUT /api/bookings/:id/rating/comment
#[derive(Deserialize)]
pub struct CommentRequest {
    pub comment: String,
}

pub async fn set_rating_comment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<BookingId>,
    Json(req): Json<CommentRequest>,
) -> Result<Response, AppError> {
    let caller = user_id(&headers)?;
    let outcome = state.engine.set_rating_comment(id, caller, &req.comment).await?;
    Ok(rate_response(outcome))
}

fn rate_response(outcome: RateOutcome) -> Response {
    let status = match outcome {
        RateOutcome::Rated { .. } => StatusCode::OK,
        RateOutcome::AlreadyRated | RateOutcome::NotRateable => StatusCode::CONFLICT,
        RateOutcome::InvalidStars | RateOutcome::CommentTooLong => StatusCode::BAD_REQUEST,
    };
    (status, Json(outcome)).into_response()
}
