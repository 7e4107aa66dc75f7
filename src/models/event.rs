use serde::{Deserialize, Serialize};

use super::{Actor, Booking, BookingStatus};

/// Emitted by the engine after a transition has been persisted.
/// `booking` carries the post-transition row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingStateChanged {
    pub booking: Booking,
    pub from: BookingStatus,
    pub actor: Actor,
}
