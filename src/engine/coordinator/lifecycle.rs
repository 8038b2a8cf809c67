use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::offer::offer_payload;
use super::{DispatchCoordinator, OfferResolution};
use crate::error::{AppError, AppResult};
use crate::lock::keys;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::order::{Order, OrderStatus};
use crate::notify::{OfferPayload, OrderUpdate};

impl DispatchCoordinator {
    /// Cancels an order that has not been picked up yet. Open offers are
    /// expired and every courier holding a lock for the order is freed.
    pub async fn cancel_order(&self, order_id: Uuid) -> AppResult<Order> {
        let token = self.lock_order(order_id).await?;
        let result = self.cancel_locked(order_id).await;
        self.unlock_order(order_id, &token).await;
        let (order, released) = result?;

        for assignment in released {
            self.release_quietly(
                &keys::courier_busy(assignment.courier_id),
                &assignment.courier_lock_token,
            )
            .await;
            self.resolve_offer(assignment.id, OfferResolution::Expired);
            self.notifier.send_order_update(
                assignment.courier_id,
                OrderUpdate {
                    order_id,
                    status: OrderStatus::Cancelled,
                    message: "order was cancelled".into(),
                },
            );
        }

        info!(order_id = %order_id, "order cancelled");
        Ok(order)
    }

    async fn cancel_locked(&self, order_id: Uuid) -> AppResult<(Order, Vec<Assignment>)> {
        let mut order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        if order.status.is_terminal() || order.status == OrderStatus::PickedUp {
            return Err(AppError::BadRequest(format!(
                "order {order_id} is {:?} and cannot be cancelled",
                order.status
            )));
        }

        order.status = OrderStatus::Cancelled;
        self.orders.save(&order).await?;

        let mut released = Vec::new();
        for open in self
            .assignments
            .find_by_order_and_statuses(order_id, &[AssignmentStatus::Pending])
            .await?
        {
            if let Some(expired) = self
                .assignments
                .transition(
                    open.id,
                    AssignmentStatus::Pending,
                    AssignmentStatus::Expired,
                    Utc::now(),
                )
                .await?
            {
                released.push(expired);
            }
        }
        released.extend(
            self.assignments
                .find_by_order_and_statuses(order_id, &[AssignmentStatus::Accepted])
                .await?,
        );

        Ok((order, released))
    }

    pub async fn mark_picked_up(&self, order_id: Uuid) -> AppResult<Order> {
        let order = self
            .advance(order_id, OrderStatus::RiderAccepted, OrderStatus::PickedUp)
            .await?;
        self.notify_assigned_courier(&order, "order picked up");
        Ok(order)
    }

    pub async fn mark_delivered(&self, order_id: Uuid) -> AppResult<Order> {
        let order = self
            .advance(order_id, OrderStatus::PickedUp, OrderStatus::Delivered)
            .await?;

        for accepted in self
            .assignments
            .find_by_order_and_statuses(order_id, &[AssignmentStatus::Accepted])
            .await?
        {
            self.release_quietly(
                &keys::courier_busy(accepted.courier_id),
                &accepted.courier_lock_token,
            )
            .await;
        }

        self.notify_assigned_courier(&order, "order delivered");
        info!(order_id = %order_id, courier_id = ?order.courier_id, "order delivered");
        Ok(order)
    }

    pub async fn pending_offers_for_courier(&self, courier_id: Uuid) -> AppResult<Vec<OfferPayload>> {
        let open = self
            .assignments
            .find_by_courier_and_status(courier_id, AssignmentStatus::Pending)
            .await?;

        let mut payloads = Vec::with_capacity(open.len());
        for assignment in open {
            if let Some(order) = self.orders.get(assignment.order_id).await? {
                payloads.push(offer_payload(&assignment, &order));
            }
        }
        Ok(payloads)
    }

    async fn advance(&self, order_id: Uuid, from: OrderStatus, to: OrderStatus) -> AppResult<Order> {
        let mut moved = false;
        let order = self
            .update_order_locked(order_id, |order| {
                if order.status == from {
                    order.status = to;
                    moved = true;
                }
                moved
            })
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;

        if !moved {
            return Err(AppError::BadRequest(format!(
                "order {order_id} is {:?}, expected {from:?}",
                order.status
            )));
        }
        Ok(order)
    }

    fn notify_assigned_courier(&self, order: &Order, message: &str) {
        if let Some(courier_id) = order.courier_id {
            self.notifier.send_order_update(
                courier_id,
                OrderUpdate {
                    order_id: order.id,
                    status: order.status,
                    message: message.to_string(),
                },
            );
        }
    }
}
