use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::courier::{Courier, GeoPoint};
use crate::notify::OfferPayload;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(create_courier).get(list_couriers))
        .route("/couriers/:id/online", patch(update_courier_online))
        .route("/couriers/:id/location", patch(update_courier_location))
        .route("/couriers/:id/offers", get(pending_offers))
}

#[derive(Deserialize)]
pub struct CreateCourierRequest {
    pub name: String,
    pub location: GeoPoint,
    pub rating: f64,
    #[serde(default)]
    pub online: bool,
}

#[derive(Deserialize)]
pub struct UpdateOnlineRequest {
    pub online: bool,
    pub location: Option<GeoPoint>,
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCourierRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = state
        .presence
        .register(&payload.name, payload.location, payload.rating)?;

    if payload.online {
        return Ok(Json(state.presence.go_online(courier.id, None).await?));
    }
    Ok(Json(courier))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Json<Vec<Courier>> {
    Json(state.couriers.list())
}

async fn update_courier_online(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOnlineRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = if payload.online {
        state.presence.go_online(id, payload.location).await?
    } else {
        state.presence.go_offline(id).await?
    };
    Ok(Json(courier))
}

async fn update_courier_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Courier>, AppError> {
    let courier = state.presence.update_location(id, payload.location).await?;
    Ok(Json(courier))
}

async fn pending_offers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OfferPayload>>, AppError> {
    Ok(Json(state.coordinator.pending_offers_for_courier(id).await?))
}
