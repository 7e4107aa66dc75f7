use chrono::{NaiveDateTime, Timelike};
use rusqlite::Connection;
use serde::Serialize;

use crate::db::queries;
use crate::models::{Booking, BookingId, UserId};

/// Reasons a client may not open a new draft right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PolicyViolation {
    #[error("rate your last visit first")]
    UnratedVisit { booking_id: BookingId },

    #[error("you already have an upcoming booking")]
    ActiveBooking { booking_id: BookingId },

    #[error("you have already used your booking for today, come back tomorrow")]
    DailyLimit { booking_id: BookingId },

    #[error("booking is suspended for today after {penalties} late cancellations")]
    Suspended { penalties: i64 },
}

/// Business rules layered on top of the state machine. The engine invokes
/// these from its guarded entry points so callers cannot skip them.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub cancel_cutoff_secs: i64,
    /// Penalties dated today at which new drafts are refused. `None` keeps
    /// penalties informational.
    pub penalty_daily_limit: Option<u32>,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            cancel_cutoff_secs: 3600,
            penalty_daily_limit: None,
        }
    }
}

impl BookingPolicy {
    /// Gates checked before a new draft, in order: unrated visit, active
    /// booking, one-per-day, penalty suspension.
    pub fn check_new_booking(
        &self,
        conn: &Connection,
        client_id: UserId,
        now: NaiveDateTime,
    ) -> rusqlite::Result<Option<PolicyViolation>> {
        if let Some(b) = queries::unrated_done(conn, client_id)? {
            return Ok(Some(PolicyViolation::UnratedVisit { booking_id: b.id }));
        }
        if let Some(violation) = self.check_holdings(conn, client_id, now)? {
            return Ok(Some(violation));
        }
        if let Some(limit) = self.penalty_daily_limit {
            let penalties = queries::count_penalties(conn, client_id, &now.date())?;
            if penalties >= limit as i64 {
                return Ok(Some(PolicyViolation::Suspended { penalties }));
            }
        }
        Ok(None)
    }

    /// Active-booking and one-per-day gates. These depend on what the client
    /// already holds, so `confirm` runs them again under the write lock.
    pub fn check_holdings(
        &self,
        conn: &Connection,
        client_id: UserId,
        now: NaiveDateTime,
    ) -> rusqlite::Result<Option<PolicyViolation>> {
        let today = now.date();
        if let Some(b) = queries::active_booking(conn, client_id, &today, now.hour())? {
            return Ok(Some(PolicyViolation::ActiveBooking { booking_id: b.id }));
        }
        if let Some(b) = queries::today_usage(conn, client_id, &today)? {
            return Ok(Some(PolicyViolation::DailyLimit { booking_id: b.id }));
        }
        Ok(None)
    }

    /// Seconds left before the booking starts when a client cancellation must
    /// be refused; `None` when the cancellation may proceed.
    pub fn late_cancellation(&self, booking: &Booking, now: NaiveDateTime) -> Option<i64> {
        let remaining = booking.slot.seconds_until(booking.date, now);
        (remaining < self.cancel_cutoff_secs).then_some(remaining)
    }

    pub fn penalty_reason(remaining_secs: i64) -> String {
        format!("attempted cancel {remaining_secs}s before slot")
    }
}
