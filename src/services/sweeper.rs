use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::AppError;
use crate::services::booking::BookingEngine;
use crate::services::rate_limit::RateLimiter;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_drafts: usize,
    pub closed_past: usize,
    pub finished: usize,
    pub failed: usize,
}

/// One pass of the time-based transitions: stale drafts expire, confirmed
/// bookings from earlier days close, and today's ended bookings finish.
/// A failure on one finished booking is logged and the rest still run.
pub async fn sweep_once(
    engine: &BookingEngine,
    draft_ttl: Duration,
) -> Result<SweepReport, AppError> {
    let mut report = SweepReport {
        expired_drafts: engine.expire_stale_drafts(draft_ttl).await?,
        closed_past: engine.close_past_bookings().await?,
        ..SweepReport::default()
    };

    for booking in engine.finishable_bookings()? {
        match engine.mark_done(booking.id).await {
            Ok(true) => report.finished += 1,
            Ok(false) => {
                tracing::debug!(
                    booking_id = booking.id,
                    "booking changed before it could be finished"
                );
            }
            Err(e) => {
                report.failed += 1;
                tracing::error!(
                    booking_id = booking.id,
                    error = %e,
                    "failed to auto-finish booking"
                );
            }
        }
    }

    Ok(report)
}

/// Background task that runs `sweep_once` on a fixed interval until `shutdown`
/// is cancelled. Tick errors are logged; the next tick runs regardless.
pub async fn run_sweeper(
    engine: Arc<BookingEngine>,
    limiter: Arc<RateLimiter>,
    period: Duration,
    draft_ttl: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(?period, ?draft_ttl, "sweeper started");
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        match sweep_once(&engine, draft_ttl).await {
            Ok(report) if report != SweepReport::default() => {
                tracing::info!(
                    expired_drafts = report.expired_drafts,
                    closed_past = report.closed_past,
                    finished = report.finished,
                    failed = report.failed,
                    "sweep applied transitions"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "sweep failed"),
        }

        limiter.purge_idle();
    }

    tracing::info!("sweeper stopped");
}
