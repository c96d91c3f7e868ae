pub mod bookings;
pub mod drivers;
pub mod vehicles;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(bookings::router())
        .merge(drivers::router())
        .merge(vehicles::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    bookings: usize,
    drivers: usize,
    vehicles: usize,
    dispatch_tasks: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (bookings, drivers, vehicles) = state.store.counts();
    Json(HealthResponse {
        status: "ok",
        bookings,
        drivers,
        vehicles,
        dispatch_tasks: state.store.dispatch_tasks().len(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
