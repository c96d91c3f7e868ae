use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{fleet, sync, tracking};
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::driver::{Driver, DriverStatus, LocationFix};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", post(create_driver).get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/status", patch(update_driver_status))
        .route("/drivers/:id/active", patch(update_driver_active))
        .route("/drivers/:id/location", patch(update_driver_location))
}

#[derive(Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    pub vehicle_id: Option<Uuid>,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DriverStatus,
}

#[derive(Deserialize)]
pub struct UpdateActiveRequest {
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

#[derive(Serialize)]
pub struct DriverView {
    #[serde(flatten)]
    pub driver: Driver,
    pub location: Option<LocationFix>,
}

fn view(state: &AppState, driver: Driver) -> DriverView {
    DriverView {
        location: state.store.location(driver.id),
        driver,
    }
}

async fn create_driver(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDriverRequest>,
) -> Result<Json<DriverView>, AppError> {
    if let Some(location) = payload.location.filter(|point| !point.is_valid()) {
        return Err(AppError::BadRequest(format!(
            "coordinate out of range: {}, {}",
            location.lat, location.lng
        )));
    }

    let now = Utc::now();
    let driver = fleet::register_driver(&state.store, payload.name, payload.vehicle_id, now).await?;

    if let Some(location) = payload.location {
        tracking::update_location(&state, driver.id, location, now)?;
    }

    Ok(Json(view(&state, driver)))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<DriverView>> {
    let drivers = state
        .store
        .drivers()
        .into_iter()
        .map(|driver| view(&state, driver))
        .collect();
    Json(drivers)
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverView>, AppError> {
    let driver = state
        .store
        .driver(id)
        .ok_or_else(|| AppError::NotFound(format!("driver {id} not found")))?;

    Ok(Json(view(&state, driver)))
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<DriverView>, AppError> {
    let driver = sync::set_driver_status(&state.store, id, payload.status, Utc::now()).await?;
    Ok(Json(view(&state, driver)))
}

async fn update_driver_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateActiveRequest>,
) -> Result<Json<DriverView>, AppError> {
    let driver = fleet::set_driver_active(&state.store, id, payload.is_active).await?;
    Ok(Json(view(&state, driver)))
}

async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<LocationFix>, AppError> {
    let fix = tracking::update_location(&state, id, payload.location, Utc::now())?;
    Ok(Json(fix))
}
