use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{eta_minutes, GeoPoint};
use crate::models::booking::{BookingStatus, Eta};
use crate::models::driver::LocationFix;
use crate::state::AppState;

pub fn update_location(
    state: &AppState,
    driver_id: Uuid,
    point: GeoPoint,
    now: DateTime<Utc>,
) -> Result<LocationFix, AppError> {
    if !point.is_valid() {
        return Err(AppError::BadRequest(format!(
            "coordinate out of range: {}, {}",
            point.lat, point.lng
        )));
    }

    let driver = state
        .store
        .driver(driver_id)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} not found")))?;

    let fix = LocationFix {
        point,
        recorded_at: now,
    };
    state.store.record_location(driver_id, fix);

    if let Some(booking_id) = driver.current_booking {
        refresh_eta(state, booking_id, driver_id, &point, now);
    }

    Ok(fix)
}

pub fn refresh_eta(
    state: &AppState,
    booking_id: Uuid,
    driver_id: Uuid,
    from: &GeoPoint,
    now: DateTime<Utc>,
) -> Option<Eta> {
    let pickup = state.store.booking(booking_id)?.pickup?;

    let eta = Eta {
        minutes: eta_minutes(from, &pickup, state.average_speed_kmh),
        computed_at: now,
    };

    let written = state.store.record_eta_if(booking_id, eta, |booking| {
        booking.is_bound_to(driver_id)
            && matches!(
                booking.status,
                BookingStatus::Confirmed | BookingStatus::Dispatched
            )
    });

    if !written {
        debug!(booking_id = %booking_id, driver_id = %driver_id, "stale eta dropped");
        return None;
    }

    Some(eta)
}
