use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Snapshot of a courier profile as seen by dispatch.
///
/// The profile itself is owned elsewhere; dispatch reads location, rating and
/// `active_orders` and never writes courier fields as part of matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Courier {
    pub id: Uuid,
    pub name: String,
    pub location: GeoPoint,
    pub online: bool,
    pub rating: f64,
    pub active_orders: u32,
    pub updated_at: DateTime<Utc>,
}

impl Courier {
    pub fn new(name: impl Into<String>, location: GeoPoint, rating: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            location,
            online: false,
            rating: rating.clamp(0.0, 5.0),
            active_orders: 0,
            updated_at: Utc::now(),
        }
    }
}
