use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::guard;
use crate::engine::lifecycle::{self, Action, AssignTarget};
use crate::engine::{publish_transition, sync};
use crate::error::{ActionResult, AppError};
use crate::models::booking::{Actor, Booking, BookingKind, BookingStatus};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub booking: Booking,
    pub message: String,
    pub warning: Option<String>,
}

impl From<ActionOutcome> for ActionResult {
    fn from(outcome: ActionOutcome) -> Self {
        ActionResult::ok(outcome.message, outcome.booking, outcome.warning)
    }
}

pub async fn accept(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
) -> Result<ActionOutcome, AppError> {
    let now = Utc::now();
    let booking = guard::try_assign(state, booking_id, driver_id, AssignTarget::Confirmed, now)
        .await?
        .into_result(driver_id)?;

    let message = if booking.status == BookingStatus::PaymentFailed {
        "booking accepted but payment failed; awaiting payment retry"
    } else {
        "booking accepted"
    };

    Ok(ActionOutcome {
        booking,
        message: message.to_string(),
        warning: None,
    })
}

pub async fn accept_emergency(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
) -> Result<ActionOutcome, AppError> {
    let kind = state
        .store
        .booking(booking_id)
        .map(|booking| booking.kind)
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;

    if kind != BookingKind::Emergency {
        return Err(AppError::BadRequest(
            "booking is not an emergency request".to_string(),
        ));
    }

    let now = Utc::now();
    let booking = guard::try_assign(state, booking_id, driver_id, AssignTarget::Dispatched, now)
        .await?
        .into_result(driver_id)?;

    Ok(ActionOutcome {
        booking,
        message: "emergency accepted; proceed to pickup".to_string(),
        warning: None,
    })
}

pub async fn start(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
) -> Result<ActionOutcome, AppError> {
    perform(state, booking_id, driver_id, Action::Start).await
}

pub async fn arrive(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
) -> Result<ActionOutcome, AppError> {
    perform(state, booking_id, driver_id, Action::Arrive).await
}

pub async fn depart(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
) -> Result<ActionOutcome, AppError> {
    perform(state, booking_id, driver_id, Action::Depart).await
}

pub async fn complete(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
) -> Result<ActionOutcome, AppError> {
    perform(state, booking_id, driver_id, Action::Complete).await
}

pub async fn cancel(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
    reason: &str,
) -> Result<ActionOutcome, AppError> {
    let action = Action::Cancel {
        reason: reason.trim().to_string(),
    };
    perform(state, booking_id, driver_id, action).await
}

async fn perform(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
    action: Action,
) -> Result<ActionOutcome, AppError> {
    let now = Utc::now();
    let mut uow = state.store.begin();

    let mut booking = uow
        .lock_booking(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;

    let payment = state.store.payment(booking_id);
    let plan = lifecycle::plan(&booking, driver_id, &action, payment.as_ref());
    let plan = plan.inspect_err(|rejection| {
        debug!(
            booking_id = %booking_id,
            driver_id = %driver_id,
            action = action.name(),
            reason = %rejection,
            "booking action rejected"
        );
    })?;

    let event = match action {
        Action::Cancel { ref reason } => {
            lifecycle::cancel(&mut booking, reason.clone(), Actor::Driver(driver_id), now)
        }
        _ => lifecycle::apply(&mut booking, plan.to, now),
    };

    uow.put_booking(booking.clone());
    sync::synchronize(&mut uow, &event).await?;
    uow.commit().await;

    publish_transition(state, &event);

    if let Some(warning) = &plan.warning {
        warn!(
            booking_id = %booking_id,
            driver_id = %driver_id,
            warning = %warning,
            "booking advanced with warning"
        );
    }
    info!(
        booking_id = %booking_id,
        driver_id = %driver_id,
        from = %event.from,
        to = %event.to,
        "booking status changed"
    );

    Ok(ActionOutcome {
        booking,
        message: format!("booking {}", event.to),
        warning: plan.warning,
    })
}
