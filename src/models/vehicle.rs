use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    OnDuty,
    Maintenance,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Uuid,
    pub plate_number: String,
    pub status: VehicleStatus,
    pub assigned_driver: Option<Uuid>,
}

impl Vehicle {
    pub fn new(plate_number: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            plate_number,
            status: VehicleStatus::Available,
            assigned_driver: None,
        }
    }
}
