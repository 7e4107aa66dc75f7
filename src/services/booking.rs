use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::db::{queries, Store};
use crate::errors::AppError;
use crate::models::{
    Actor, Booking, BookingId, BookingStateChanged, BookingStatus, Penalty, Slot, UserId, WorkHour,
    MAX_COMMENT_LEN,
};
use crate::services::policy::{BookingPolicy, PolicyViolation};

pub type EventSender = mpsc::UnboundedSender<BookingStateChanged>;
pub type EventReceiver = mpsc::UnboundedReceiver<BookingStateChanged>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DraftOutcome {
    Created { booking_id: BookingId },
    Refused { violation: PolicyViolation },
    /// The provider has not opened this slot.
    SlotClosed { slot: Slot },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    /// A client backing out of a draft; the draft is expired, not cancelled.
    DraftAbandoned,
    TooLate { remaining_secs: i64 },
    NotCancellable { status: BookingStatus },
    NotParticipant,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RateOutcome {
    Rated { rating_id: i64 },
    AlreadyRated,
    NotRateable,
    InvalidStars,
    CommentTooLong,
}

/// Owns the booking state machine. Every mutation runs under the store's
/// write lock; transitions that matter to the other party are published as
/// `BookingStateChanged` after they are persisted.
pub struct BookingEngine {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    policy: BookingPolicy,
    events: EventSender,
}

impl BookingEngine {
    pub fn new(
        store: Arc<Store>,
        clock: Arc<dyn Clock>,
        policy: BookingPolicy,
        events: EventSender,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
            events,
        }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    // ── State machine ──

    /// Expire the client's current draft, if any, and open a new one. Slot
    /// availability is not checked here; `confirm` re-validates.
    pub async fn create_draft(
        &self,
        provider_id: UserId,
        client_id: UserId,
        date: NaiveDate,
        slot: Slot,
    ) -> Result<BookingId, AppError> {
        let now = self.clock.utc_now();
        let id = self
            .store
            .write(|conn| Self::replace_draft(conn, provider_id, client_id, &date, slot, &now))
            .await?;

        tracing::info!(booking_id = id, provider_id, client_id, %date, %slot, "draft created");
        Ok(id)
    }

    /// Policy-gated draft creation; what client-facing callers should use.
    /// The gates, the open-slot check and the insert share one write lock.
    pub async fn request_draft(
        &self,
        provider_id: UserId,
        client_id: UserId,
        date: NaiveDate,
        slot: Slot,
    ) -> Result<DraftOutcome, AppError> {
        let now_local = self.clock.local_now();
        let now = self.clock.utc_now();
        let outcome = self
            .store
            .write(|conn| {
                let violation = self.policy.check_new_booking(conn, client_id, now_local)?;
                if let Some(violation) = violation {
                    return Ok(DraftOutcome::Refused { violation });
                }
                if !queries::work_hour_enabled(conn, provider_id, slot)? {
                    return Ok(DraftOutcome::SlotClosed { slot });
                }
                let booking_id =
                    Self::replace_draft(conn, provider_id, client_id, &date, slot, &now)?;
                Ok(DraftOutcome::Created { booking_id })
            })
            .await?;

        match &outcome {
            DraftOutcome::Created { booking_id } => {
                tracing::info!(booking_id, provider_id, client_id, %date, %slot, "draft created");
            }
            DraftOutcome::Refused { violation } => {
                tracing::info!(client_id, ?violation, "draft refused by policy");
            }
            DraftOutcome::SlotClosed { .. } => {
                tracing::info!(provider_id, client_id, %slot, "draft refused, slot not open");
            }
        }
        Ok(outcome)
    }

    fn replace_draft(
        conn: &rusqlite::Connection,
        provider_id: UserId,
        client_id: UserId,
        date: &NaiveDate,
        slot: Slot,
        now: &NaiveDateTime,
    ) -> Result<BookingId, AppError> {
        let tx = conn.unchecked_transaction()?;
        let replaced = queries::expire_client_drafts(&tx, client_id)?;
        let id = queries::insert_draft(&tx, provider_id, client_id, date, slot, now)?;
        tx.commit()?;
        if replaced > 0 {
            tracing::debug!(client_id, replaced, "expired previous draft");
        }
        Ok(id)
    }

    /// DRAFT → CONFIRMED unless another booking already holds the slot.
    /// `false` leaves the draft untouched so the client can pick another slot.
    /// A client who has come to hold another booking since drafting is
    /// refused with `AppError::Policy`.
    pub async fn confirm(&self, id: BookingId) -> Result<bool, AppError> {
        let now_local = self.clock.local_now();
        let now = self.clock.utc_now();
        let confirmed = self
            .store
            .write(|conn| {
                let Some(draft) = queries::get_booking(conn, id)? else {
                    return Ok(None);
                };
                if draft.status != BookingStatus::Draft {
                    tracing::debug!(
                        booking_id = id,
                        status = draft.status.as_str(),
                        "confirm on non-draft"
                    );
                    return Ok(None);
                }
                if let Some(violation) =
                    self.policy.check_holdings(conn, draft.client_id, now_local)?
                {
                    return Err(AppError::Policy(violation));
                }
                if let Some(holder) = queries::find_confirmed_holder(conn, &draft)? {
                    tracing::info!(
                        booking_id = id,
                        holder,
                        slot = %draft.slot,
                        "slot already taken"
                    );
                    return Ok(None);
                }
                if !queries::mark_confirmed(conn, id, &now)? {
                    return Ok(None);
                }
                Ok(queries::get_booking(conn, id)?)
            })
            .await?;

        match confirmed {
            Some(booking) => {
                tracing::info!(
                    booking_id = id,
                    client_id = booking.client_id,
                    provider_id = booking.provider_id,
                    "booking confirmed"
                );
                let actor = Actor::Client(booking.client_id);
                self.publish(booking, BookingStatus::Draft, actor);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Cancel on behalf of `actor`. Providers cancel confirmed bookings
    /// unconditionally; clients go through the cutoff, and a refused attempt
    /// records a penalty.
    pub async fn cancel(&self, id: BookingId, actor: Actor) -> Result<CancelOutcome, AppError> {
        let now_local = self.clock.local_now();
        let now = self.clock.utc_now();

        let (outcome, changed) = self
            .store
            .write(|conn| {
                let Some(booking) = queries::get_booking(conn, id)? else {
                    return Ok((CancelOutcome::NotFound, None));
                };

                let is_participant = match actor {
                    Actor::Client(uid) => uid == booking.client_id,
                    Actor::Provider(uid) => uid == booking.provider_id,
                    Actor::System => true,
                };
                if !is_participant {
                    return Ok((CancelOutcome::NotParticipant, None));
                }

                match (booking.status, actor) {
                    (BookingStatus::Draft, Actor::Client(_)) => {
                        queries::transition(
                            conn,
                            id,
                            BookingStatus::Draft,
                            BookingStatus::Expired,
                        )?;
                        Ok((CancelOutcome::DraftAbandoned, None))
                    }
                    (BookingStatus::Confirmed, Actor::Client(client_id)) => {
                        let late = self.policy.late_cancellation(&booking, now_local);
                        if let Some(remaining_secs) = late {
                            let reason = BookingPolicy::penalty_reason(remaining_secs);
                            queries::insert_penalty(conn, client_id, &booking.date, &reason, &now)?;
                            return Ok((CancelOutcome::TooLate { remaining_secs }, None));
                        }
                        Self::apply_cancel(conn, booking)
                    }
                    (BookingStatus::Confirmed, _) => Self::apply_cancel(conn, booking),
                    (status, _) => Ok((CancelOutcome::NotCancellable { status }, None)),
                }
            })
            .await?;

        match &outcome {
            CancelOutcome::TooLate { remaining_secs } => {
                tracing::warn!(
                    booking_id = id,
                    remaining_secs,
                    "late cancellation refused, penalty recorded"
                );
            }
            CancelOutcome::Cancelled => {
                tracing::info!(booking_id = id, ?actor, "booking cancelled")
            }
            CancelOutcome::DraftAbandoned => tracing::info!(booking_id = id, "draft abandoned"),
            _ => {}
        }

        if let Some(booking) = changed {
            self.publish(booking, BookingStatus::Confirmed, actor);
        }
        Ok(outcome)
    }

    fn apply_cancel(
        conn: &rusqlite::Connection,
        mut booking: Booking,
    ) -> Result<(CancelOutcome, Option<Booking>), AppError> {
        let from = BookingStatus::Confirmed;
        if !queries::transition(conn, booking.id, from, BookingStatus::Cancelled)? {
            return Ok((CancelOutcome::NotCancellable { status: booking.status }, None));
        }
        booking.status = BookingStatus::Cancelled;
        Ok((CancelOutcome::Cancelled, Some(booking)))
    }

    /// CONFIRMED → DONE. Repeating it on a DONE booking reports success
    /// without another transition.
    pub async fn mark_done(&self, id: BookingId) -> Result<bool, AppError> {
        let (done, changed) = self
            .store
            .write(|conn| {
                let Some(mut booking) = queries::get_booking(conn, id)? else {
                    return Ok((false, None));
                };
                match booking.status {
                    BookingStatus::Done => Ok((true, None)),
                    BookingStatus::Confirmed => {
                        let from = BookingStatus::Confirmed;
                        if !queries::transition(conn, id, from, BookingStatus::Done)? {
                            return Ok((false, None));
                        }
                        booking.status = BookingStatus::Done;
                        Ok((true, Some(booking)))
                    }
                    _ => Ok((false, None)),
                }
            })
            .await?;

        if let Some(booking) = changed {
            tracing::info!(booking_id = id, "booking done");
            self.publish(booking, BookingStatus::Confirmed, Actor::System);
        }
        Ok(done)
    }

    /// DRAFT → EXPIRED; a no-op for anything else.
    pub async fn expire_draft(&self, id: BookingId) -> Result<bool, AppError> {
        self.store
            .write(|conn| {
                Ok(queries::transition(conn, id, BookingStatus::Draft, BookingStatus::Expired)?)
            })
            .await
    }

    // ── Bulk transitions used by the sweeper ──

    pub async fn expire_stale_drafts(&self, ttl: Duration) -> Result<usize, AppError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AppError::Validation(format!("draft ttl out of range: {e}")))?;
        let cutoff = self.clock.utc_now() - ttl;
        self.store
            .write(|conn| Ok(queries::expire_drafts_created_by(conn, &cutoff)?))
            .await
    }

    /// Confirmed bookings dated before today can only be over; close them.
    pub async fn close_past_bookings(&self) -> Result<usize, AppError> {
        let today = self.clock.today();
        self.store
            .write(|conn| Ok(queries::close_confirmed_before(conn, &today)?))
            .await
    }

    /// Today's confirmed bookings whose slot has ended.
    pub fn finishable_bookings(&self) -> Result<Vec<Booking>, AppError> {
        let today = self.clock.today();
        let hour = self.clock.current_hour();
        let confirmed = self.store.read(|conn| Ok(queries::confirmed_on(conn, &today)?))?;
        Ok(confirmed
            .into_iter()
            .filter(|b| b.slot.has_ended(hour))
            .collect())
    }

    // ── Queries ──

    pub fn get_booking(&self, id: BookingId) -> Result<Option<Booking>, AppError> {
        self.store.read(|conn| Ok(queries::get_booking(conn, id)?))
    }

    pub fn get_confirmed_slots(
        &self,
        provider_id: UserId,
        date: NaiveDate,
    ) -> Result<BTreeSet<Slot>, AppError> {
        self.store.read(|conn| {
            Ok(queries::confirmed_slots(conn, provider_id, &date)?
                .into_iter()
                .collect())
        })
    }

    pub fn get_active_booking(&self, client_id: UserId) -> Result<Option<Booking>, AppError> {
        let today = self.clock.today();
        let hour = self.clock.current_hour();
        self.store
            .read(|conn| Ok(queries::active_booking(conn, client_id, &today, hour)?))
    }

    pub fn get_today_usage(
        &self,
        client_id: UserId,
        date: NaiveDate,
    ) -> Result<Option<Booking>, AppError> {
        self.store
            .read(|conn| Ok(queries::today_usage(conn, client_id, &date)?))
    }

    pub fn get_unrated_done(&self, client_id: UserId) -> Result<Option<Booking>, AppError> {
        self.store.read(|conn| Ok(queries::unrated_done(conn, client_id)?))
    }

    pub fn get_client_draft(&self, client_id: UserId) -> Result<Option<Booking>, AppError> {
        self.store.read(|conn| Ok(queries::client_draft(conn, client_id)?))
    }

    pub fn count_penalties(&self, client_id: UserId, date: NaiveDate) -> Result<i64, AppError> {
        self.store
            .read(|conn| Ok(queries::count_penalties(conn, client_id, &date)?))
    }

    pub fn get_penalties(&self, client_id: UserId) -> Result<Vec<Penalty>, AppError> {
        self.store
            .read(|conn| Ok(queries::penalties_for_client(conn, client_id)?))
    }

    /// Average stars and number of ratings across the provider's visits.
    pub fn get_provider_rating(&self, provider_id: UserId) -> Result<(f64, i64), AppError> {
        self.store
            .read(|conn| Ok(queries::provider_rating(conn, provider_id)?))
    }

    // ── Slot grid ──

    pub async fn init_work_hours(&self, provider_id: UserId) -> Result<(), AppError> {
        self.store
            .write(|conn| {
                let tx = conn.unchecked_transaction()?;
                queries::init_work_hours(&tx, provider_id)?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    /// Flip one slot of the provider's grid and return the new flag.
    /// Confirmed bookings already in that slot are left in place.
    pub async fn toggle_work_hour(
        &self,
        provider_id: UserId,
        slot: Slot,
    ) -> Result<bool, AppError> {
        let today = self.clock.today();
        let (enabled, kept) = self
            .store
            .write(|conn| {
                let enabled = queries::toggle_work_hour(conn, provider_id, slot)?.ok_or_else(|| {
                    AppError::NotFound(format!("work hours for provider {provider_id}"))
                })?;
                let kept = if enabled {
                    0
                } else {
                    queries::count_confirmed_from(conn, provider_id, slot, &today)?
                };
                Ok((enabled, kept))
            })
            .await?;

        if kept > 0 {
            tracing::warn!(
                provider_id,
                %slot,
                kept,
                "slot disabled with confirmed bookings still in place"
            );
        }
        Ok(enabled)
    }

    pub fn get_work_hours(&self, provider_id: UserId) -> Result<Vec<WorkHour>, AppError> {
        self.store.read(|conn| Ok(queries::work_hours(conn, provider_id)?))
    }

    /// Enabled slots not confirmed by anyone; on today's date, slots that
    /// have already started are left out.
    pub fn get_available_slots(
        &self,
        provider_id: UserId,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, AppError> {
        let now = self.clock.local_now();
        let (grid, taken) = self.store.read(|conn| {
            Ok((
                queries::work_hours(conn, provider_id)?,
                queries::confirmed_slots(conn, provider_id, &date)?,
            ))
        })?;

        Ok(grid
            .into_iter()
            .filter(|wh| wh.enabled && !taken.contains(&wh.slot))
            .map(|wh| wh.slot)
            .filter(|slot| slot.seconds_until(date, now) >= 0)
            .collect())
    }

    // ── Ratings ──

    /// Rate a finished visit, once per booking, by the client who made it.
    pub async fn rate(
        &self,
        booking_id: BookingId,
        client_id: UserId,
        stars: u8,
        comment: Option<&str>,
    ) -> Result<RateOutcome, AppError> {
        if !(1..=5).contains(&stars) {
            return Ok(RateOutcome::InvalidStars);
        }
        let comment = comment.map(str::trim).filter(|c| !c.is_empty());
        if comment.is_some_and(|c| c.chars().count() > MAX_COMMENT_LEN) {
            return Ok(RateOutcome::CommentTooLong);
        }

        let now = self.clock.utc_now();
        let outcome = self
            .store
            .write(|conn| {
                let Some(booking) = queries::get_booking(conn, booking_id)? else {
                    return Ok(RateOutcome::NotRateable);
                };
                if booking.client_id != client_id || booking.status != BookingStatus::Done {
                    return Ok(RateOutcome::NotRateable);
                }
                if queries::rating_for_booking(conn, booking_id)?.is_some() {
                    return Ok(RateOutcome::AlreadyRated);
                }
                let rating_id = queries::insert_rating(conn, &booking, stars, comment, &now)?;
                Ok(RateOutcome::Rated { rating_id })
            })
            .await?;

        if let RateOutcome::Rated { .. } = outcome {
            tracing::info!(booking_id, client_id, stars, "visit rated");
        }
        Ok(outcome)
    }

    pub async fn set_rating_comment(
        &self,
        booking_id: BookingId,
        client_id: UserId,
        comment: &str,
    ) -> Result<RateOutcome, AppError> {
        let comment = comment.trim();
        if comment.chars().count() > MAX_COMMENT_LEN {
            return Ok(RateOutcome::CommentTooLong);
        }
        self.store
            .write(|conn| {
                match queries::rating_for_booking(conn, booking_id)? {
                    Some(rating) if rating.client_id == client_id => {
                        queries::update_rating_comment(conn, booking_id, comment)?;
                        Ok(RateOutcome::Rated { rating_id: rating.id })
                    }
                    _ => Ok(RateOutcome::NotRateable),
                }
            })
            .await
    }

    fn publish(&self, booking: Booking, from: BookingStatus, actor: Actor) {
        let booking_id = booking.id;
        if self
            .events
            .send(BookingStateChanged {
                booking,
                from,
                actor,
            })
            .is_err()
        {
            tracing::debug!(booking_id, "no event consumer, dropping state change");
        }
    }
}
