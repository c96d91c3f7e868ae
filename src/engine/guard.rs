//! Assignment guard: the single point where competing claims on a booking are
//! serialized.
//!
//! The booking row is locked first, then the candidate driver, then the
//! driver's vehicle. All preconditions are evaluated under those locks and
//! every write (booking binding plus derived driver/vehicle status) commits as
//! one unit of work, so two concurrent claims always resolve as if one ran
//! after the other.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::lifecycle::{self, AssignTarget};
use crate::engine::{publish_transition, sync};
use crate::error::{AppError, Rejection};
use crate::models::booking::{Booking, BookingKind};
use crate::models::event::Notification;
use crate::models::vehicle::VehicleStatus;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub enum AssignOutcome {
    Assigned(Booking),
    AlreadyTaken,
    DriverUnavailable,
    BookingNotPending,
}

impl AssignOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AssignOutcome::Assigned(_) => "assigned",
            AssignOutcome::AlreadyTaken => "already_taken",
            AssignOutcome::DriverUnavailable => "driver_unavailable",
            AssignOutcome::BookingNotPending => "booking_not_pending",
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, AssignOutcome::Assigned(_))
    }

    pub fn into_result(self, driver_id: Uuid) -> Result<Booking, Rejection> {
        match self {
            AssignOutcome::Assigned(booking) => Ok(booking),
            AssignOutcome::AlreadyTaken => Err(Rejection::AlreadyTaken),
            AssignOutcome::DriverUnavailable => Err(Rejection::DriverUnavailable(driver_id)),
            AssignOutcome::BookingNotPending => Err(Rejection::BookingNotPending),
        }
    }
}

pub async fn try_assign(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
    target: AssignTarget,
    now: DateTime<Utc>,
) -> Result<AssignOutcome, AppError> {
    let outcome = claim(state, booking_id, driver_id, target, now).await?;

    state
        .metrics
        .assignments_total
        .with_label_values(&[outcome.label()])
        .inc();

    match &outcome {
        AssignOutcome::Assigned(booking) => {
            info!(
                booking_id = %booking_id,
                driver_id = %driver_id,
                status = %booking.status,
                "driver assigned"
            );
        }
        AssignOutcome::AlreadyTaken => {
            info!(booking_id = %booking_id, driver_id = %driver_id, "booking already taken");
        }
        other => {
            debug!(
                booking_id = %booking_id,
                driver_id = %driver_id,
                outcome = other.label(),
                "assignment refused"
            );
        }
    }

    Ok(outcome)
}

async fn claim(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
    target: AssignTarget,
    now: DateTime<Utc>,
) -> Result<AssignOutcome, AppError> {
    let store = &state.store;
    let mut uow = store.begin();

    let mut booking = uow
        .lock_booking(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;

    let payment = store.payment(booking_id);
    let to = match lifecycle::plan_assignment(&booking, target, payment.as_ref()) {
        Ok(to) => to,
        Err(Rejection::AlreadyTaken) => return Ok(AssignOutcome::AlreadyTaken),
        Err(_) => return Ok(AssignOutcome::BookingNotPending),
    };

    let driver = uow
        .lock_driver(driver_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    let Some(vehicle_id) = driver.vehicle_id.filter(|_| driver.is_assignable()) else {
        return Ok(AssignOutcome::DriverUnavailable);
    };

    let vehicle_ready = uow
        .lock_vehicle(vehicle_id)
        .await?
        .is_some_and(|vehicle| vehicle.status == VehicleStatus::Available);
    if !vehicle_ready {
        return Ok(AssignOutcome::DriverUnavailable);
    }

    booking.driver_id = Some(driver_id);
    booking.vehicle_id = Some(vehicle_id);
    let event = lifecycle::apply(&mut booking, to, now);

    uow.put_booking(booking.clone());
    sync::synchronize(&mut uow, &event).await?;
    uow.commit().await;

    let waited = now
        .signed_duration_since(booking.created_at)
        .to_std()
        .unwrap_or_default();
    state
        .metrics
        .time_to_assign_seconds
        .with_label_values(&[kind_label(&booking)])
        .observe(waited.as_secs_f64());

    state.notify(Notification::DriverAssigned {
        booking_id,
        driver_id,
    });
    publish_transition(state, &event);

    Ok(AssignOutcome::Assigned(booking))
}

fn kind_label(booking: &Booking) -> &'static str {
    match booking.kind {
        BookingKind::Emergency => "emergency",
        BookingKind::Scheduled => "scheduled",
    }
}
