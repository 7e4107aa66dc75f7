use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::booking::BookingEngine;
use crate::services::rate_limit::RateLimiter;

pub struct AppState {
    pub engine: Arc<BookingEngine>,
    pub limiter: Arc<RateLimiter>,
    pub config: AppConfig,
}
