use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Available,
    Busy,
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub status: DriverStatus,
    pub vehicle_id: Option<Uuid>,
    pub is_active: bool,
    pub current_booking: Option<Uuid>,
    pub completed_trips: u32,
    pub status_updated_at: DateTime<Utc>,
}

impl Driver {
    pub fn new(name: String, vehicle_id: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            status: DriverStatus::Available,
            vehicle_id,
            is_active: true,
            current_booking: None,
            completed_trips: 0,
            status_updated_at: now,
        }
    }

    pub fn is_assignable(&self) -> bool {
        self.status == DriverStatus::Available
            && self.is_active
            && self.vehicle_id.is_some()
            && self.current_booking.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LocationFix {
    pub point: GeoPoint,
    pub recorded_at: DateTime<Utc>,
}
