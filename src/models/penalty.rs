use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::UserId;

/// Recorded when a client tries to cancel inside the cutoff window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Penalty {
    pub id: i64,
    pub client_id: UserId,
    pub date: NaiveDate,
    pub reason: Option<String>,
    pub created_at: NaiveDateTime,
}
