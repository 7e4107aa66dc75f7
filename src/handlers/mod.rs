pub mod bookings;
pub mod clients;
pub mod health;
pub mod providers;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::models::UserId;
use crate::services::rate_limit::{ActionKind, RetryAfter};
use crate::state::AppState;

pub const USER_HEADER: &str = "x-user-id";

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/providers/:id/slots", get(providers::available_slots))
        .route("/api/providers/:id/work-hours", get(providers::work_hours))
        .route(
            "/api/providers/:id/work-hours/init",
            post(providers::init_work_hours),
        )
        .route(
            "/api/providers/:id/work-hours/:slot/toggle",
            post(providers::toggle_work_hour),
        )
        .route("/api/providers/:id/rating", get(providers::rating_summary))
        .route("/api/bookings/draft", post(bookings::create_draft))
        .route("/api/bookings/:id", get(bookings::get_booking))
        .route("/api/bookings/:id/confirm", post(bookings::confirm))
        .route("/api/bookings/:id/cancel", post(bookings::cancel))
        .route("/api/bookings/:id/done", post(bookings::mark_done))
        .route("/api/bookings/:id/rating", post(bookings::rate))
        .route(
            "/api/bookings/:id/rating/comment",
            put(bookings::set_rating_comment),
        )
        .route("/api/clients/:id/active", get(clients::active))
        .route("/api/clients/:id/penalties", get(clients::penalties))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The acting user, taken from the `X-User-Id` header.
pub(crate) fn user_id(headers: &HeaderMap) -> Result<UserId, AppError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or(AppError::Unauthorized)
}

pub(crate) fn throttle(
    state: &AppState,
    user_id: UserId,
    action: ActionKind,
) -> Result<(), AppError> {
    state
        .limiter
        .check(user_id, action)
        .map_err(|RetryAfter(wait)| AppError::RateLimited {
            retry_after_secs: wait.as_secs().max(1),
        })
}
