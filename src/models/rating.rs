use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{BookingId, UserId};

pub const MAX_COMMENT_LEN: usize = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    pub id: i64,
    pub booking_id: BookingId,
    pub provider_id: UserId,
    pub client_id: UserId,
    pub stars: u8,
    pub comment: Option<String>,
    pub created_at: NaiveDateTime,
}
