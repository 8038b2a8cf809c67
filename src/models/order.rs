use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::courier::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Placed,
    SearchingRider,
    OfferSent,
    #[serde(alias = "ASSIGNED_TO_RIDER")]
    RiderAccepted,
    PickedUp,
    Delivered,
    NoRiderAvailable,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Whether a dispatch loop may still work on an order in this status.
    pub fn is_dispatchable(self) -> bool {
        matches!(
            self,
            OrderStatus::Placed
                | OrderStatus::SearchingRider
                | OrderStatus::OfferSent
                | OrderStatus::NoRiderAvailable
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub restaurant_name: String,
    pub pickup: GeoPoint,
    pub status: OrderStatus,
    pub courier_id: Option<Uuid>,
    pub rider_earning: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(restaurant_name: impl Into<String>, pickup: GeoPoint) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            restaurant_name: restaurant_name.into(),
            pickup,
            status: OrderStatus::Placed,
            courier_id: None,
            rider_earning: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_courier(&self) -> bool {
        self.courier_id.is_some()
    }
}
