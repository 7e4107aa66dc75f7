use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Timelike, Utc};

/// Wall clock pinned to the provider's fixed UTC offset. Every "today" and
/// "remaining seconds" computation goes through this, never client-local time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn local_now(&self) -> NaiveDateTime {
        self.now().naive_local()
    }

    fn utc_now(&self) -> NaiveDateTime {
        self.now().naive_utc()
    }

    fn current_hour(&self) -> u32 {
        self.now().hour()
    }
}

pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(utc_offset_hours: i32) -> anyhow::Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .with_context(|| format!("invalid UTC offset: {utc_offset_hours}h"))?;
        Ok(Self { offset })
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

/// Clock that only moves when told to. Used by tests and replay tooling.
pub struct ManualClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl ManualClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Parse `"%Y-%m-%d %H:%M"` as local time at the given offset.
    pub fn at(local: &str, utc_offset_hours: i32) -> anyhow::Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .with_context(|| format!("invalid UTC offset: {utc_offset_hours}h"))?;
        let naive = NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M")
            .with_context(|| format!("invalid local time: {local}"))?;
        let now = naive
            .and_local_timezone(offset)
            .single()
            .with_context(|| format!("ambiguous local time: {local}"))?;
        Ok(Self::new(now))
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock().unwrap()
    }
}
