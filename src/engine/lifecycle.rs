use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Rejection;
use crate::models::booking::{Actor, Booking, BookingKind, BookingStatus, Cancellation};
use crate::models::event::TransitionEvent;
use crate::models::payment::{Payment, PaymentStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Start,
    Arrive,
    Depart,
    Complete,
    Cancel { reason: String },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Arrive => "arrive",
            Action::Depart => "depart",
            Action::Complete => "complete",
            Action::Cancel { .. } => "cancel",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignTarget {
    Confirmed,
    Dispatched,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub to: BookingStatus,
    pub warning: Option<String>,
}

impl Plan {
    fn to(to: BookingStatus) -> Self {
        Self { to, warning: None }
    }
}

pub fn plan(
    booking: &Booking,
    driver_id: Uuid,
    action: &Action,
    payment: Option<&Payment>,
) -> Result<Plan, Rejection> {
    let from = booking.status;
    let invalid = || Rejection::InvalidTransition {
        action: action.name(),
        from,
    };

    let plan = match action {
        Action::Start => match from {
            BookingStatus::Confirmed => Plan::to(BookingStatus::Dispatched),
            _ => return Err(invalid()),
        },
        Action::Arrive => match from {
            BookingStatus::Dispatched => Plan::to(BookingStatus::Arrived),
            _ => return Err(invalid()),
        },
        Action::Depart => match from {
            BookingStatus::Arrived => depart_plan(booking.kind, payment)?,
            _ => return Err(invalid()),
        },
        Action::Complete => match from {
            BookingStatus::Dispatched | BookingStatus::Enroute => {
                Plan::to(BookingStatus::Completed)
            }
            BookingStatus::Arrived => {
                completion_gate(booking.kind, payment)?;
                Plan::to(BookingStatus::Completed)
            }
            _ => return Err(invalid()),
        },
        Action::Cancel { reason } => match from {
            BookingStatus::Confirmed | BookingStatus::Dispatched => {
                if reason.trim().is_empty() {
                    return Err(Rejection::MissingReason);
                }
                Plan::to(BookingStatus::Cancelled)
            }
            _ => return Err(invalid()),
        },
    };

    if !booking.is_bound_to(driver_id) {
        return Err(Rejection::NotBoundDriver(driver_id));
    }

    Ok(plan)
}

fn depart_plan(kind: BookingKind, payment: Option<&Payment>) -> Result<Plan, Rejection> {
    match kind {
        BookingKind::Emergency => {
            let settled = payment.is_some_and(Payment::is_settled);
            Ok(Plan {
                to: BookingStatus::Enroute,
                warning: (!settled)
                    .then(|| "payment not settled yet; collect it before completion".to_string()),
            })
        }
        BookingKind::Scheduled => {
            if payment.is_some_and(Payment::covers_down_payment) {
                Ok(Plan::to(BookingStatus::Enroute))
            } else {
                Err(Rejection::PaymentRequired(
                    "a settled down payment is required before departure",
                ))
            }
        }
    }
}

fn completion_gate(kind: BookingKind, payment: Option<&Payment>) -> Result<(), Rejection> {
    match kind {
        BookingKind::Emergency if !payment.is_some_and(Payment::is_settled_full) => Err(
            Rejection::PaymentRequired("a settled full payment is required to complete"),
        ),
        BookingKind::Scheduled if !payment.is_some_and(Payment::is_settled_final) => Err(
            Rejection::PaymentRequired("a settled final payment is required to complete"),
        ),
        _ => Ok(()),
    }
}

pub fn plan_assignment(
    booking: &Booking,
    target: AssignTarget,
    payment: Option<&Payment>,
) -> Result<BookingStatus, Rejection> {
    if booking.driver_id.is_some() {
        return Err(Rejection::AlreadyTaken);
    }

    if booking.status != BookingStatus::Pending {
        return Err(Rejection::BookingNotPending);
    }

    let payment_failed = payment.is_some_and(|p| p.status == PaymentStatus::Failed);

    Ok(match target {
        AssignTarget::Dispatched => BookingStatus::Dispatched,
        AssignTarget::Confirmed if booking.kind == BookingKind::Scheduled && payment_failed => {
            BookingStatus::PaymentFailed
        }
        AssignTarget::Confirmed => BookingStatus::Confirmed,
    })
}

pub fn plan_payment_retry(booking: &Booking, settled: bool) -> Result<BookingStatus, Rejection> {
    if booking.status != BookingStatus::PaymentFailed {
        return Err(Rejection::InvalidTransition {
            action: "retry payment for",
            from: booking.status,
        });
    }

    Ok(if settled {
        BookingStatus::Confirmed
    } else {
        BookingStatus::Cancelled
    })
}

pub fn apply(booking: &mut Booking, to: BookingStatus, now: DateTime<Utc>) -> TransitionEvent {
    let from = booking.status;

    match to {
        BookingStatus::Confirmed | BookingStatus::PaymentFailed => {
            booking.confirmed_at.get_or_insert(now);
        }
        BookingStatus::Dispatched if from == BookingStatus::Pending => {
            booking.confirmed_at.get_or_insert(now);
        }
        BookingStatus::Dispatched | BookingStatus::Arrived => {
            booking.pickup_at.get_or_insert(now);
        }
        BookingStatus::Completed => {
            booking.completed_at = Some(now);
        }
        _ => {}
    }

    booking.status = to;

    TransitionEvent {
        booking_id: booking.id,
        driver_id: booking.driver_id,
        vehicle_id: booking.vehicle_id,
        from,
        to,
        at: now,
    }
}

pub fn cancel(
    booking: &mut Booking,
    reason: String,
    actor: Actor,
    now: DateTime<Utc>,
) -> TransitionEvent {
    booking.cancellation = Some(Cancellation {
        reason,
        actor,
        cancelled_at: now,
    });
    apply(booking, BookingStatus::Cancelled, now)
}
