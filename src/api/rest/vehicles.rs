use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::fleet;
use crate::error::AppError;
use crate::models::vehicle::{Vehicle, VehicleStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/vehicles", post(create_vehicle).get(list_vehicles))
        .route("/vehicles/:id/status", patch(update_vehicle_status))
}

#[derive(Deserialize)]
pub struct CreateVehicleRequest {
    pub plate_number: String,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: VehicleStatus,
}

async fn create_vehicle(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateVehicleRequest>,
) -> Result<Json<Vehicle>, AppError> {
    let vehicle = fleet::register_vehicle(&state.store, payload.plate_number)?;
    Ok(Json(vehicle))
}

async fn list_vehicles(State(state): State<Arc<AppState>>) -> Json<Vec<Vehicle>> {
    Json(state.store.vehicles())
}

async fn update_vehicle_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Vehicle>, AppError> {
    let vehicle = fleet::set_vehicle_status(&state.store, id, payload.status).await?;
    Ok(Json(vehicle))
}
