//! Per-recipient delivery status.
//!
//! Statuses have a natural ordering: Sent < Delivered < Read. A status row only
//! ever moves forward along that order.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent = 0,
    Delivered = 1,
    Read = 2,
}

impl DeliveryStatus {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    /// Numeric rank, matches the `message_status_rank` SQL function
    pub fn rank(&self) -> i16 {
        *self as i16
    }

    /// Whether moving from `self` to `next` is a forward transition
    pub fn advances_to(&self, next: DeliveryStatus) -> bool {
        next > *self
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db(s).ok_or_else(|| format!("Invalid status: {}", s))
    }
}
