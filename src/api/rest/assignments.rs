use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/assignments", get(list_assignments))
        .route("/assignments/:id/respond", post(respond))
}

#[derive(Deserialize)]
pub struct RespondRequest {
    pub courier_id: Uuid,
    pub accepted: bool,
}

async fn list_assignments(State(state): State<Arc<AppState>>) -> Json<Vec<Assignment>> {
    Json(state.assignments.all())
}

async fn respond(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RespondRequest>,
) -> Result<Json<Assignment>, AppError> {
    let assignment = state
        .coordinator
        .respond(id, payload.courier_id, payload.accepted)
        .await?;
    Ok(Json(assignment))
}
