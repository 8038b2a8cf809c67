use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::geo::GeoIndex;
use crate::models::courier::{Courier, GeoPoint};
use crate::store::InMemoryCourierDirectory;

/// Keeps the geo index in step with couriers going online, offline and moving.
/// Only online couriers are indexed, so only they can be found by dispatch.
#[derive(Clone)]
pub struct CourierPresence {
    geo: Arc<dyn GeoIndex>,
    directory: Arc<InMemoryCourierDirectory>,
}

impl CourierPresence {
    pub fn new(geo: Arc<dyn GeoIndex>, directory: Arc<InMemoryCourierDirectory>) -> Self {
        Self { geo, directory }
    }

    pub fn register(&self, name: &str, location: GeoPoint, rating: f64) -> AppResult<Courier> {
        if name.trim().is_empty() {
            return Err(AppError::BadRequest("name cannot be empty".to_string()));
        }
        validate(&location)?;

        let courier = Courier::new(name.trim(), location, rating);
        self.directory.upsert(courier.clone());
        Ok(courier)
    }

    pub async fn go_online(&self, id: Uuid, location: Option<GeoPoint>) -> AppResult<Courier> {
        if let Some(location) = &location {
            validate(location)?;
        }

        let courier = self
            .directory
            .update(id, |courier| {
                courier.online = true;
                if let Some(location) = location {
                    courier.location = location;
                }
            })
            .ok_or_else(|| not_found(id))?;

        self.geo.upsert(id, courier.location).await?;
        info!(courier_id = %id, "courier online");
        Ok(courier)
    }

    pub async fn go_offline(&self, id: Uuid) -> AppResult<Courier> {
        let courier = self
            .directory
            .update(id, |courier| courier.online = false)
            .ok_or_else(|| not_found(id))?;

        self.geo.remove(id).await?;
        info!(courier_id = %id, "courier offline");
        Ok(courier)
    }

    pub async fn update_location(&self, id: Uuid, location: GeoPoint) -> AppResult<Courier> {
        validate(&location)?;

        let courier = self
            .directory
            .update(id, |courier| courier.location = location)
            .ok_or_else(|| not_found(id))?;

        if courier.online {
            self.geo.upsert(id, location).await?;
        }
        Ok(courier)
    }
}

fn validate(location: &GeoPoint) -> AppResult<()> {
    let in_range = (-90.0..=90.0).contains(&location.lat) && (-180.0..=180.0).contains(&location.lng);
    if in_range {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "location out of range: {}, {}",
            location.lat, location.lng
        )))
    }
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("courier {id} not found"))
}
