mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::courier::GeoPoint;

pub use memory::InMemoryGeoIndex;

const EARTH_RADIUS_KM: f64 = 6_371.0;

/// Great-circle distance in kilometres.
pub fn haversine_km(from: &GeoPoint, to: &GeoPoint) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lng = (to.lng - from.lng).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + from.lat.to_radians().cos() * to.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);

    EARTH_RADIUS_KM * 2.0 * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Live positions of online couriers.
#[async_trait]
pub trait GeoIndex: Send + Sync {
    async fn upsert(&self, courier_id: Uuid, location: GeoPoint) -> AppResult<()>;

    async fn remove(&self, courier_id: Uuid) -> AppResult<()>;

    /// Couriers within `radius_km` of `center`, nearest first, at most `limit`.
    /// An empty result is not an error.
    async fn find_nearby(
        &self,
        center: GeoPoint,
        radius_km: f64,
        limit: usize,
    ) -> AppResult<Vec<Uuid>>;
}
