use serde::{Deserialize, Serialize};

use super::{Slot, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkHour {
    pub provider_id: UserId,
    pub slot: Slot,
    pub enabled: bool,
}
