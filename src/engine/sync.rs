use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, Rejection};
use crate::models::booking::BookingStatus;
use crate::models::driver::{Driver, DriverStatus};
use crate::models::event::TransitionEvent;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::store::{Store, UnitOfWork};

pub fn derive(event: &TransitionEvent, driver: &mut Driver, vehicle: Option<&mut Vehicle>) {
    match (event.from, event.to) {
        (
            BookingStatus::Pending,
            BookingStatus::Confirmed | BookingStatus::Dispatched | BookingStatus::PaymentFailed,
        ) => {
            driver.status = DriverStatus::Busy;
            driver.current_booking = Some(event.booking_id);
            driver.status_updated_at = event.at;

            if let Some(vehicle) = vehicle {
                vehicle.status = VehicleStatus::OnDuty;
                vehicle.assigned_driver = Some(driver.id);
            }
        }
        (_, BookingStatus::Completed | BookingStatus::Cancelled) => {
            if event.to == BookingStatus::Completed {
                driver.completed_trips = driver.completed_trips.saturating_add(1);
            }

            if driver.current_booking != Some(event.booking_id) {
                return;
            }

            driver.status = DriverStatus::Available;
            driver.current_booking = None;
            driver.status_updated_at = event.at;

            if let Some(vehicle) = vehicle {
                if vehicle.status == VehicleStatus::OnDuty {
                    vehicle.status = VehicleStatus::Available;
                }
            }
        }
        _ => {}
    }
}

pub async fn synchronize(
    uow: &mut UnitOfWork<'_>,
    event: &TransitionEvent,
) -> Result<(), AppError> {
    let Some(driver_id) = event.driver_id else {
        return Ok(());
    };

    let mut driver = uow
        .lock_driver(driver_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    let mut vehicle = match event.vehicle_id {
        Some(vehicle_id) => uow.lock_vehicle(vehicle_id).await?,
        None => None,
    };

    derive(event, &mut driver, vehicle.as_mut());

    debug!(
        booking_id = %event.booking_id,
        driver_id = %driver.id,
        driver_status = ?driver.status,
        to = %event.to,
        "driver status synchronized"
    );

    uow.put_driver(driver);
    if let Some(vehicle) = vehicle {
        uow.put_vehicle(vehicle);
    }

    Ok(())
}

pub async fn set_driver_status(
    store: &Store,
    driver_id: Uuid,
    status: DriverStatus,
    now: DateTime<Utc>,
) -> Result<Driver, AppError> {
    let mut uow = store.begin();
    let mut driver = uow
        .lock_driver(driver_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    let holds_live_booking = driver
        .current_booking
        .and_then(|booking_id| store.booking(booking_id))
        .is_some_and(|booking| booking.status.is_live());

    if holds_live_booking {
        return Err(Rejection::DriverHasLiveBooking(driver_id).into());
    }

    driver.status = status;
    driver.status_updated_at = now;
    uow.put_driver(driver.clone());
    uow.commit().await;

    info!(driver_id = %driver_id, status = ?status, "driver status changed");
    Ok(driver)
}
