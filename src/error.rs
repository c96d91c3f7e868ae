use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::booking::{Booking, BookingStatus};
use crate::store::StoreError;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    BadRequest,
    InvalidTransition,
    NotBoundDriver,
    PaymentRequired,
    MissingReason,
    DriverHasLiveBooking,
    VehicleInUse,
    AlreadyTaken,
    DriverUnavailable,
    BookingNotPending,
    Retryable,
    Internal,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum Rejection {
    #[error("cannot {action} a booking that is {from}")]
    InvalidTransition {
        action: &'static str,
        from: BookingStatus,
    },

    #[error("driver {0} is not assigned to this booking")]
    NotBoundDriver(Uuid),

    #[error("payment required: {0}")]
    PaymentRequired(&'static str),

    #[error("a cancellation reason is required")]
    MissingReason,

    #[error("driver {0} has a booking in progress")]
    DriverHasLiveBooking(Uuid),

    #[error("vehicle {0} is on duty")]
    VehicleInUse(Uuid),

    #[error("booking already accepted by another driver")]
    AlreadyTaken,

    #[error("driver {0} is not available for assignment")]
    DriverUnavailable(Uuid),

    #[error("booking is no longer pending")]
    BookingNotPending,
}

impl Rejection {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Rejection::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Rejection::NotBoundDriver(_) => ErrorKind::NotBoundDriver,
            Rejection::PaymentRequired(_) => ErrorKind::PaymentRequired,
            Rejection::MissingReason => ErrorKind::MissingReason,
            Rejection::DriverHasLiveBooking(_) => ErrorKind::DriverHasLiveBooking,
            Rejection::VehicleInUse(_) => ErrorKind::VehicleInUse,
            Rejection::AlreadyTaken => ErrorKind::AlreadyTaken,
            Rejection::DriverUnavailable(_) => ErrorKind::DriverUnavailable,
            Rejection::BookingNotPending => ErrorKind::BookingNotPending,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Rejected(#[from] Rejection),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::BadRequest(_) => ErrorKind::BadRequest,
            AppError::Rejected(rejection) => rejection.kind(),
            AppError::Store(_) => ErrorKind::Retryable,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Rejected(Rejection::AlreadyTaken | Rejection::BookingNotPending) => {
                StatusCode::CONFLICT
            }
            AppError::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub booking: Option<Booking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>, booking: Booking, warning: Option<String>) -> Self {
        Self {
            success: true,
            error_kind: None,
            message: message.into(),
            booking: Some(booking),
            warning,
        }
    }

    pub fn failed(err: &AppError) -> Self {
        Self {
            success: false,
            error_kind: Some(err.kind()),
            message: err.to_string(),
            booking: None,
            warning: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ActionResult::failed(&self))).into_response()
    }
}
