//! Out-of-band messages to couriers. Fire-and-forget: dispatch never waits
//! for delivery or acknowledgement.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::models::order::OrderStatus;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub assignment_id: Uuid,
    pub order_id: Uuid,
    pub restaurant_name: String,
    pub earnings: f64,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub distance_km: f64,
    pub eta: u32,
    pub surge: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    AssignmentRequest {
        courier_id: Uuid,
        payload: OfferPayload,
    },
    OrderUpdate {
        courier_id: Uuid,
        update: OrderUpdate,
    },
}

impl DispatchEvent {
    pub fn courier_id(&self) -> Uuid {
        match self {
            DispatchEvent::AssignmentRequest { courier_id, .. }
            | DispatchEvent::OrderUpdate { courier_id, .. } => *courier_id,
        }
    }
}

pub trait NotificationChannel: Send + Sync {
    fn send_offer_to_courier(&self, courier_id: Uuid, payload: OfferPayload);

    fn send_order_update(&self, courier_id: Uuid, update: OrderUpdate);
}

/// Publishes events on a broadcast channel; the WebSocket endpoint relays
/// them to connected courier apps.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<DispatchEvent>,
}

impl BroadcastNotifier {
    pub fn new(buffer: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, event: DispatchEvent) {
        let courier_id = event.courier_id();
        if self.tx.send(event).is_err() {
            debug!(courier_id = %courier_id, "no listeners for dispatch event");
        }
    }
}

impl NotificationChannel for BroadcastNotifier {
    fn send_offer_to_courier(&self, courier_id: Uuid, payload: OfferPayload) {
        self.publish(DispatchEvent::AssignmentRequest {
            courier_id,
            payload,
        });
    }

    fn send_order_update(&self, courier_id: Uuid, update: OrderUpdate) {
        self.publish(DispatchEvent::OrderUpdate { courier_id, update });
    }
}
