use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::booking::BookingStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TransitionEvent {
    pub booking_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    DriverAssigned {
        booking_id: Uuid,
        driver_id: Uuid,
    },
    BookingStatusChanged {
        booking_id: Uuid,
        old: BookingStatus,
        new: BookingStatus,
    },
    UnassignedEscalation {
        booking_id: Uuid,
        attempts: u32,
    },
}

impl From<&TransitionEvent> for Notification {
    fn from(event: &TransitionEvent) -> Self {
        Notification::BookingStatusChanged {
            booking_id: event.booking_id,
            old: event.from,
            new: event.to,
        }
    }
}
