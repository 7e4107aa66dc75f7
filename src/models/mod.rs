pub mod booking;
pub mod event;
pub mod penalty;
pub mod rating;
pub mod slot;
pub mod work_hour;

pub use booking::{Actor, Booking, BookingId, BookingStatus, UserId};
pub use event::BookingStateChanged;
pub use penalty::Penalty;
pub use rating::{Rating, MAX_COMMENT_LEN};
pub use slot::{InvalidSlot, Slot, WORK_HOUR_START};
pub use work_hour::WorkHour;
