use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Hour of day at which slot 0 starts.
pub const WORK_HOUR_START: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("slot {0} is outside 0..16")]
pub struct InvalidSlot(pub i64);

/// One of the sixteen one-hour windows of a provider's day, 08:00 through 23:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Slot(u8);

impl Slot {
    pub const COUNT: u8 = 16;

    pub fn new(index: u8) -> Option<Self> {
        (index < Self::COUNT).then_some(Slot(index))
    }

    pub fn all() -> impl Iterator<Item = Slot> {
        (0..Self::COUNT).map(Slot)
    }

    pub fn start_hour(self) -> u32 {
        WORK_HOUR_START + self.0 as u32
    }

    pub fn end_hour(self) -> u32 {
        self.start_hour() + 1
    }

    pub fn starts_at(self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(NaiveTime::MIN) + Duration::hours(self.start_hour() as i64)
    }

    /// Seconds from `now` until the slot on `date` starts. Negative once it has started.
    /// Both sides are provider-local wall time.
    pub fn seconds_until(self, date: NaiveDate, now: NaiveDateTime) -> i64 {
        (self.starts_at(date) - now).num_seconds()
    }

    /// A slot is over once the clock has reached its end hour.
    pub fn has_ended(self, current_hour: u32) -> bool {
        current_hour >= self.end_hour()
    }
}

impl TryFrom<u8> for Slot {
    type Error = InvalidSlot;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Slot::new(index).ok_or(InvalidSlot(index as i64))
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> u8 {
        slot.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:00", self.start_hour())
    }
}

impl ToSql for Slot {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0 as i64))
    }
}

impl FromSql for Slot {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_i64()?;
        u8::try_from(raw)
            .ok()
            .and_then(Slot::new)
            .ok_or(FromSqlError::OutOfRange(raw))
    }
}
