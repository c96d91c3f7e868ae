use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::actions::ActionOutcome;
use crate::engine::lifecycle;
use crate::engine::scheduler::start_dispatch;
use crate::engine::{publish_transition, sync};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::booking::{Actor, Booking, BookingKind, BookingStatus};
use crate::models::payment::{Payment, PaymentKind, PaymentStatus};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct NewBooking {
    pub kind: BookingKind,
    pub pickup: Option<GeoPoint>,
    pub destination: Option<GeoPoint>,
}

pub async fn create_booking(state: &AppState, request: NewBooking) -> Result<Booking, AppError> {
    for point in request.pickup.iter().chain(request.destination.iter()) {
        if !point.is_valid() {
            return Err(AppError::BadRequest(format!(
                "coordinate out of range: {}, {}",
                point.lat, point.lng
            )));
        }
    }

    let now = Utc::now();
    let booking = Booking::new(request.kind, request.pickup, request.destination, now);
    state.store.insert_booking(booking.clone());

    info!(booking_id = %booking.id, kind = ?booking.kind, "booking created");

    if booking.kind == BookingKind::Emergency {
        if let Err(err) = start_dispatch(state, &booking, now).await {
            state.store.remove_booking(booking.id);
            return Err(err);
        }
    }

    Ok(booking)
}

pub fn record_payment(
    state: &AppState,
    booking_id: Uuid,
    kind: PaymentKind,
    status: PaymentStatus,
    now: DateTime<Utc>,
) -> Result<Payment, AppError> {
    if state.store.booking(booking_id).is_none() {
        return Err(AppError::NotFound(format!("booking {booking_id} not found")));
    }

    let payment = Payment {
        booking_id,
        kind,
        status,
        recorded_at: now,
    };
    state.store.record_payment(payment.clone());

    info!(booking_id = %booking_id, kind = ?kind, status = ?status, "payment recorded");
    Ok(payment)
}

pub async fn retry_payment(
    state: &AppState,
    booking_id: Uuid,
    settled: bool,
) -> Result<ActionOutcome, AppError> {
    let now = Utc::now();
    let mut uow = state.store.begin();

    let mut booking = uow
        .lock_booking(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("booking {booking_id} not found")))?;

    let to = lifecycle::plan_payment_retry(&booking, settled)?;
    let event = match to {
        BookingStatus::Cancelled => lifecycle::cancel(
            &mut booking,
            "payment retry failed".to_string(),
            Actor::System,
            now,
        ),
        _ => lifecycle::apply(&mut booking, to, now),
    };

    uow.put_booking(booking.clone());
    sync::synchronize(&mut uow, &event).await?;
    uow.commit().await;

    if settled {
        let kind = state
            .store
            .payment(booking_id)
            .map_or(PaymentKind::DownPayment, |payment| payment.kind);
        state.store.record_payment(Payment {
            booking_id,
            kind,
            status: PaymentStatus::Settled,
            recorded_at: now,
        });
    }

    publish_transition(state, &event);
    info!(booking_id = %booking_id, settled, to = %event.to, "payment retry resolved");

    Ok(ActionOutcome {
        booking,
        message: format!("booking {}", event.to),
        warning: None,
    })
}
