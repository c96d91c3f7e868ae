use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    Emergency,
    Scheduled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Dispatched,
    Arrived,
    Enroute,
    Completed,
    Cancelled,
    PaymentFailed,
}

impl BookingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    pub fn is_live(self) -> bool {
        !self.is_terminal() && self != BookingStatus::Pending
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Dispatched => "dispatched",
            BookingStatus::Arrived => "arrived",
            BookingStatus::Enroute => "enroute",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::PaymentFailed => "payment_failed",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum Actor {
    Driver(Uuid),
    Scheduler,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cancellation {
    pub reason: String,
    pub actor: Actor,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub kind: BookingKind,
    pub status: BookingStatus,
    pub driver_id: Option<Uuid>,
    pub vehicle_id: Option<Uuid>,
    pub pickup: Option<GeoPoint>,
    pub destination: Option<GeoPoint>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub pickup_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancellation: Option<Cancellation>,
    pub escalated_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn new(
        kind: BookingKind,
        pickup: Option<GeoPoint>,
        destination: Option<GeoPoint>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: BookingStatus::Pending,
            driver_id: None,
            vehicle_id: None,
            pickup,
            destination,
            created_at,
            confirmed_at: None,
            pickup_at: None,
            completed_at: None,
            cancellation: None,
            escalated_at: None,
        }
    }

    pub fn is_unassigned(&self) -> bool {
        self.status == BookingStatus::Pending && self.driver_id.is_none()
    }

    pub fn is_bound_to(&self, driver_id: Uuid) -> bool {
        self.driver_id == Some(driver_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Eta {
    pub minutes: f64,
    pub computed_at: DateTime<Utc>,
}
