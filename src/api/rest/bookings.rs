use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::actions::{self, ActionOutcome};
use crate::engine::intake::{self, NewBooking};
use crate::error::{ActionResult, AppError};
use crate::models::booking::{Booking, Eta};
use crate::models::dispatch::DispatchTask;
use crate::models::payment::{Payment, PaymentKind, PaymentStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking).get(list_bookings))
        .route("/bookings/:id", get(get_booking))
        .route("/bookings/:id/accept", post(accept))
        .route("/bookings/:id/accept-emergency", post(accept_emergency))
        .route("/bookings/:id/start", post(start))
        .route("/bookings/:id/arrive", post(arrive))
        .route("/bookings/:id/depart", post(depart))
        .route("/bookings/:id/complete", post(complete))
        .route("/bookings/:id/cancel", post(cancel))
        .route("/bookings/:id/payments", post(record_payment))
        .route("/bookings/:id/payment-retry", post(retry_payment))
}

#[derive(Deserialize)]
pub struct DriverActionRequest {
    pub driver_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct RecordPaymentRequest {
    pub kind: PaymentKind,
    pub status: PaymentStatus,
}

#[derive(Deserialize)]
pub struct RetryPaymentRequest {
    pub settled: bool,
}

#[derive(Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub eta: Option<Eta>,
    pub payment: Option<Payment>,
    pub dispatch: Option<DispatchTask>,
}

type ActionResponse = Result<Json<ActionResult>, AppError>;

fn respond(outcome: ActionOutcome) -> Json<ActionResult> {
    Json(outcome.into())
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewBooking>,
) -> Result<Json<Booking>, AppError> {
    let booking = intake::create_booking(&state, payload).await?;
    Ok(Json(booking))
}

async fn list_bookings(State(state): State<Arc<AppState>>) -> Json<Vec<Booking>> {
    let mut bookings = state.store.bookings();
    bookings.sort_by_key(|booking| booking.created_at);
    Json(bookings)
}

async fn get_booking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<BookingView>, AppError> {
    let booking = state
        .store
        .booking(id)
        .ok_or_else(|| AppError::NotFound(format!("booking {id} not found")))?;

    Ok(Json(BookingView {
        eta: state.store.eta(id),
        payment: state.store.payment(id),
        dispatch: state.store.dispatch_task(id),
        booking,
    }))
}

async fn accept(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> ActionResponse {
    actions::accept(&state, id, payload.driver_id).await.map(respond)
}

async fn accept_emergency(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> ActionResponse {
    actions::accept_emergency(&state, id, payload.driver_id)
        .await
        .map(respond)
}

async fn start(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> ActionResponse {
    actions::start(&state, id, payload.driver_id).await.map(respond)
}

async fn arrive(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> ActionResponse {
    actions::arrive(&state, id, payload.driver_id).await.map(respond)
}

async fn depart(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> ActionResponse {
    actions::depart(&state, id, payload.driver_id).await.map(respond)
}

async fn complete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> ActionResponse {
    actions::complete(&state, id, payload.driver_id)
        .await
        .map(respond)
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverActionRequest>,
) -> ActionResponse {
    let reason = payload.reason.unwrap_or_default();
    actions::cancel(&state, id, payload.driver_id, &reason)
        .await
        .map(respond)
}

async fn record_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RecordPaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    let payment = intake::record_payment(&state, id, payload.kind, payload.status, Utc::now())?;
    Ok(Json(payment))
}

async fn retry_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RetryPaymentRequest>,
) -> ActionResponse {
    intake::retry_payment(&state, id, payload.settled)
        .await
        .map(respond)
}
