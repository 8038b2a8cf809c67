use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{DispatchCoordinator, OfferResolution};
use crate::error::{AppError, AppResult};
use crate::lock::keys;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::order::OrderStatus;
use crate::notify::OrderUpdate;

const OFFER_CLOSED: &str = "assignment expired or already processed";

enum Verdict {
    Accepted(Assignment),
    /// The accept lost. `expired` is set when this call closed the offer and
    /// still has to free the courier.
    Refused {
        expired: Option<Assignment>,
        error: AppError,
    },
}

impl DispatchCoordinator {
    pub async fn respond(
        self: &Arc<Self>,
        assignment_id: Uuid,
        courier_id: Uuid,
        accepted: bool,
    ) -> AppResult<Assignment> {
        let assignment = self
            .assignments
            .get(assignment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("assignment {assignment_id} not found")))?;

        if assignment.courier_id != courier_id {
            return Err(AppError::BadRequest(format!(
                "assignment {assignment_id} was offered to another courier"
            )));
        }
        if !assignment.status.is_open() {
            return Err(AppError::Conflict(OFFER_CLOSED.into()));
        }

        if accepted {
            self.accept(assignment).await
        } else {
            self.reject(assignment).await
        }
    }

    async fn accept(&self, assignment: Assignment) -> AppResult<Assignment> {
        let order_id = assignment.order_id;
        let token = self.lock_order(order_id).await?;
        let verdict = self.accept_locked(&assignment).await;
        self.unlock_order(order_id, &token).await;

        match verdict? {
            Verdict::Accepted(accepted) => {
                self.resolve_offer(accepted.id, OfferResolution::Accepted);
                self.finish_dispatch(order_id).await;
                self.notifier.send_order_update(
                    accepted.courier_id,
                    OrderUpdate {
                        order_id,
                        status: OrderStatus::RiderAccepted,
                        message: "order assigned to you".into(),
                    },
                );
                info!(
                    order_id = %order_id,
                    courier_id = %accepted.courier_id,
                    assignment_id = %accepted.id,
                    earning = accepted.expected_earning,
                    "offer accepted"
                );
                Ok(accepted)
            }
            Verdict::Refused { expired, error } => {
                if let Some(expired) = expired {
                    self.release_quietly(
                        &keys::courier_busy(expired.courier_id),
                        &expired.courier_lock_token,
                    )
                    .await;
                    self.resolve_offer(expired.id, OfferResolution::Expired);
                    info!(assignment_id = %expired.id, error = %error, "late accept expired the offer");
                }
                Err(error)
            }
        }
    }

    async fn accept_locked(&self, assignment: &Assignment) -> AppResult<Verdict> {
        let id = assignment.id;

        let order = match self.orders.get(assignment.order_id).await? {
            Some(order) if order.has_courier() => {
                Err(AppError::Conflict("order already taken".into()))
            }
            Some(order) if order.status.is_dispatchable() => Ok(order),
            _ => Err(AppError::Conflict("order is no longer available".into())),
        };
        let mut order = match order {
            Ok(order) => order,
            Err(error) => {
                let expired = self
                    .assignments
                    .transition(id, AssignmentStatus::Pending, AssignmentStatus::Expired, Utc::now())
                    .await?;
                return Ok(Verdict::Refused { expired, error });
            }
        };

        let Some(accepted) = self
            .assignments
            .transition(id, AssignmentStatus::Pending, AssignmentStatus::Accepted, Utc::now())
            .await?
        else {
            return Ok(Verdict::Refused {
                expired: None,
                error: AppError::Conflict(OFFER_CLOSED.into()),
            });
        };

        order.courier_id = Some(accepted.courier_id);
        order.status = OrderStatus::RiderAccepted;
        order.rider_earning = Some(accepted.expected_earning);
        if let Err(error) = self.orders.save(&order).await {
            // Undo so the waiting loop moves on instead of believing the accept.
            let expired = self
                .assignments
                .transition(id, AssignmentStatus::Accepted, AssignmentStatus::Expired, Utc::now())
                .await?;
            return Ok(Verdict::Refused { expired, error });
        }

        Ok(Verdict::Accepted(accepted))
    }

    async fn finish_dispatch(&self, order_id: Uuid) {
        if let Some((_, token)) = self.guards.remove(&order_id) {
            self.release_quietly(&keys::dispatch_guard(order_id), &token)
                .await;
        }

        let refused = match self
            .assignments
            .find_by_order_and_statuses(
                order_id,
                &[AssignmentStatus::Rejected, AssignmentStatus::TimedOut],
            )
            .await
        {
            Ok(refused) => refused,
            Err(err) => {
                warn!(order_id = %order_id, error = %err, "could not load refusals to clear");
                return;
            }
        };

        for courier_id in refused.iter().map(|a| a.courier_id) {
            for key in [
                keys::reject_count(order_id, courier_id),
                keys::reject_cooldown(order_id, courier_id),
            ] {
                if let Err(err) = self.locks.delete(&key).await {
                    warn!(key, error = %err, "could not clear refusal state");
                }
            }
        }
    }

    async fn reject(self: &Arc<Self>, assignment: Assignment) -> AppResult<Assignment> {
        let Some(rejected) = self
            .assignments
            .transition(
                assignment.id,
                AssignmentStatus::Pending,
                AssignmentStatus::Rejected,
                Utc::now(),
            )
            .await?
        else {
            return Err(AppError::Conflict(OFFER_CLOSED.into()));
        };

        let order_id = rejected.order_id;
        info!(
            order_id = %order_id,
            courier_id = %rejected.courier_id,
            assignment_id = %rejected.id,
            "offer rejected"
        );

        let refusal = self.record_refusal(order_id, rejected.courier_id).await;
        self.revert_to_searching(order_id).await;
        self.release_quietly(
            &keys::courier_busy(rejected.courier_id),
            &rejected.courier_lock_token,
        )
        .await;

        if !self.resolve_offer(rejected.id, OfferResolution::Rejected) {
            // Nobody is waiting on this offer any more; search again.
            if let Err(err) = self.dispatch(order_id).await {
                warn!(order_id = %order_id, error = %err, "re-dispatch after reject failed");
            }
        }

        refusal.map(|_| rejected)
    }
}
