use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{haversine_km, GeoIndex};
use crate::error::AppResult;
use crate::models::courier::GeoPoint;

#[derive(Default)]
pub struct InMemoryGeoIndex {
    positions: DashMap<Uuid, GeoPoint>,
}

impl InMemoryGeoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[async_trait]
impl GeoIndex for InMemoryGeoIndex {
    async fn upsert(&self, courier_id: Uuid, location: GeoPoint) -> AppResult<()> {
        self.positions.insert(courier_id, location);
        Ok(())
    }

    async fn remove(&self, courier_id: Uuid) -> AppResult<()> {
        self.positions.remove(&courier_id);
        Ok(())
    }

    async fn find_nearby(
        &self,
        center: GeoPoint,
        radius_km: f64,
        limit: usize,
    ) -> AppResult<Vec<Uuid>> {
        let mut hits: Vec<(Uuid, f64)> = self
            .positions
            .iter()
            .filter_map(|entry| {
                let distance = haversine_km(&center, entry.value());
                (distance <= radius_km).then_some((*entry.key(), distance))
            })
            .collect();

        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(limit);

        Ok(hits.into_iter().map(|(id, _)| id).collect())
    }
}
