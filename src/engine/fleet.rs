use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, Rejection};
use crate::models::driver::Driver;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::store::Store;

pub fn register_vehicle(store: &Store, plate_number: String) -> Result<Vehicle, AppError> {
    let plate_number = plate_number.trim().to_string();
    if plate_number.is_empty() {
        return Err(AppError::BadRequest("plate_number cannot be empty".to_string()));
    }

    let vehicle = Vehicle::new(plate_number);
    store.insert_vehicle(vehicle.clone());

    info!(vehicle_id = %vehicle.id, plate_number = %vehicle.plate_number, "vehicle registered");
    Ok(vehicle)
}

pub async fn register_driver(
    store: &Store,
    name: String,
    vehicle_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<Driver, AppError> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let driver = Driver::new(name, vehicle_id, now);
    let mut uow = store.begin();
    uow.lock_driver(driver.id).await?;

    if let Some(vehicle_id) = vehicle_id {
        let mut vehicle = uow
            .lock_vehicle(vehicle_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("vehicle {vehicle_id} not found")))?;

        if vehicle.assigned_driver.is_some() {
            return Err(AppError::BadRequest(format!(
                "vehicle {vehicle_id} already has a driver"
            )));
        }

        vehicle.assigned_driver = Some(driver.id);
        uow.put_vehicle(vehicle);
    }

    uow.put_driver(driver.clone());
    uow.commit().await;

    info!(driver_id = %driver.id, vehicle_id = ?vehicle_id, "driver registered");
    Ok(driver)
}

pub async fn set_vehicle_status(
    store: &Store,
    vehicle_id: Uuid,
    status: VehicleStatus,
) -> Result<Vehicle, AppError> {
    if status == VehicleStatus::OnDuty {
        return Err(AppError::BadRequest(
            "on_duty is set by booking assignment".to_string(),
        ));
    }

    let mut uow = store.begin();
    let mut vehicle = uow
        .lock_vehicle(vehicle_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("vehicle {vehicle_id} not found")))?;

    if vehicle.status == VehicleStatus::OnDuty {
        return Err(Rejection::VehicleInUse(vehicle_id).into());
    }

    vehicle.status = status;
    uow.put_vehicle(vehicle.clone());
    uow.commit().await;

    info!(vehicle_id = %vehicle_id, status = ?status, "vehicle status changed");
    Ok(vehicle)
}

pub async fn set_driver_active(
    store: &Store,
    driver_id: Uuid,
    is_active: bool,
) -> Result<Driver, AppError> {
    let mut uow = store.begin();
    let mut driver = uow
        .lock_driver(driver_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    driver.is_active = is_active;
    uow.put_driver(driver.clone());
    uow.commit().await;

    info!(driver_id = %driver_id, is_active, "driver eligibility changed");
    Ok(driver)
}
