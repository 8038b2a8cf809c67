use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::coordinator::DispatchTicket;
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::courier::GeoPoint;
use crate::models::order::Order;
use crate::state::AppState;
use crate::store::OrderRepository;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/dispatch", post(dispatch_order))
        .route("/orders/:id/assignments", get(order_assignments))
        .route("/orders/:id/picked-up", patch(mark_picked_up))
        .route("/orders/:id/delivered", patch(mark_delivered))
        .route("/orders/:id/cancel", post(cancel_order))
}

fn default_dispatch() -> bool {
    true
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub restaurant_name: String,
    pub pickup: GeoPoint,
    /// Start matching right away, as a paid order would.
    #[serde(default = "default_dispatch")]
    pub dispatch: bool,
}

#[derive(Serialize)]
pub struct DispatchResponse {
    pub order_id: Uuid,
    pub dispatch: &'static str,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    if payload.restaurant_name.trim().is_empty() {
        return Err(AppError::BadRequest(
            "restaurant_name cannot be empty".to_string(),
        ));
    }

    let order = Order::new(payload.restaurant_name.trim(), payload.pickup);
    state.orders.save(&order).await?;

    if payload.dispatch {
        state.coordinator.dispatch(order.id).await?;
    }

    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    let order = state
        .orders
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("order {} not found", id)))?;

    Ok(Json(order))
}

async fn dispatch_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<DispatchResponse>), AppError> {
    let (status, dispatch) = match state.coordinator.dispatch(id).await? {
        DispatchTicket::Started(_) => (StatusCode::ACCEPTED, "started"),
        DispatchTicket::AlreadyInProgress => (StatusCode::OK, "already_in_progress"),
    };

    Ok((
        status,
        Json(DispatchResponse {
            order_id: id,
            dispatch,
        }),
    ))
}

async fn order_assignments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Assignment>>, AppError> {
    if state.orders.get(id).await?.is_none() {
        return Err(AppError::NotFound(format!("order {} not found", id)));
    }

    let assignments = state
        .assignments
        .all()
        .into_iter()
        .filter(|assignment| assignment.order_id == id)
        .collect();

    Ok(Json(assignments))
}

async fn mark_picked_up(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.coordinator.mark_picked_up(id).await?))
}

async fn mark_delivered(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.coordinator.mark_delivered(id).await?))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    Ok(Json(state.coordinator.cancel_order(id).await?))
}
