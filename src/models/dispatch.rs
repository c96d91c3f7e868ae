use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchTask {
    pub booking_id: Uuid,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
}

impl DispatchTask {
    pub fn new(booking_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            booking_id,
            attempt: 1,
            started_at,
        }
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..*self
        }
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Nearby,
    Broadcast,
}

impl Phase {
    pub fn for_elapsed(elapsed: Duration, nearby_window: Duration) -> Self {
        if elapsed <= nearby_window {
            Phase::Nearby
        } else {
            Phase::Broadcast
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Nearby => "nearby",
            Phase::Broadcast => "broadcast",
        }
    }
}
