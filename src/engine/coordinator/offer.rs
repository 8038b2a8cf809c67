use std::collections::VecDeque;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use super::{DispatchCoordinator, OfferResolution};
use crate::engine::scoring::ScoredCandidate;
use crate::error::AppResult;
use crate::lock::{self, keys};
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::order::{Order, OrderStatus};
use crate::notify::OfferPayload;

pub(super) struct SentOffer {
    pub(super) assignment: Assignment,
    resolution: oneshot::Receiver<OfferResolution>,
    sent_at: Instant,
}

pub(super) enum OfferOutcome {
    Sent(SentOffer),
    ShortlistBusy,
    OrderLocked,
    /// The order got a courier or an open offer through another path.
    RaceLost,
}

pub(super) fn offer_payload(assignment: &Assignment, order: &Order) -> OfferPayload {
    OfferPayload {
        assignment_id: assignment.id,
        order_id: order.id,
        restaurant_name: order.restaurant_name.clone(),
        earnings: assignment.expected_earning,
        pickup_lat: order.pickup.lat,
        pickup_lng: order.pickup.lng,
        distance_km: assignment.distance_km,
        eta: assignment.eta_min as u32,
        surge: assignment.surge_multiplier > 1.0,
    }
}

impl DispatchCoordinator {
    pub(super) async fn attempt_assignment(
        &self,
        order: &Order,
        shortlist: Vec<ScoredCandidate>,
        attempt: u32,
        surge: f64,
    ) -> AppResult<OfferOutcome> {
        let mut queue = VecDeque::from(shortlist);

        while let Some(candidate) = queue.pop_front() {
            let courier_id = candidate.courier.id;
            let courier_key = keys::courier_busy(courier_id);
            let courier_token = lock::new_token();

            if !self
                .locks
                .try_acquire(&courier_key, &courier_token, self.settings.courier_busy_ttl)
                .await?
            {
                debug!(courier_id = %courier_id, "courier became busy, trying next candidate");
                continue;
            }

            let order_key = keys::order_lock(order.id);
            let order_token = lock::new_token();
            let order_locked = self
                .locks
                .try_acquire(&order_key, &order_token, self.settings.order_lock_ttl)
                .await;
            if !matches!(order_locked, Ok(true)) {
                self.release_quietly(&courier_key, &courier_token).await;
                return order_locked.map(|_| OfferOutcome::OrderLocked);
            }

            let created = self
                .create_offer(order.id, &candidate, attempt, surge, &courier_token)
                .await;

            self.release_quietly(&order_key, &order_token).await;
            if !matches!(created, Ok(Some(_))) {
                self.release_quietly(&courier_key, &courier_token).await;
            }

            return Ok(match created? {
                Some(sent) => OfferOutcome::Sent(sent),
                None => OfferOutcome::RaceLost,
            });
        }

        Ok(OfferOutcome::ShortlistBusy)
    }

    async fn create_offer(
        &self,
        order_id: Uuid,
        candidate: &ScoredCandidate,
        attempt: u32,
        surge: f64,
        courier_token: &str,
    ) -> AppResult<Option<SentOffer>> {
        let Some(mut order) = self.orders.get(order_id).await? else {
            return Ok(None);
        };
        if order.has_courier() || !order.status.is_dispatchable() {
            return Ok(None);
        }
        if let Some(open) = self.assignments.find_pending_for_order(order_id).await? {
            debug!(assignment_id = %open.id, "order already has an open offer");
            return Ok(None);
        }

        let payout = self
            .pricing
            .calculate_payout(candidate.distance_km, candidate.eta_min, surge);

        let assignment = Assignment {
            id: Uuid::new_v4(),
            order_id,
            courier_id: candidate.courier.id,
            status: AssignmentStatus::Pending,
            attempt,
            surge_multiplier: surge,
            distance_km: candidate.distance_km,
            eta_min: candidate.eta_min,
            score: candidate.score,
            score_breakdown: candidate.breakdown.clone(),
            expected_earning: payout,
            assigned_at: Utc::now(),
            responded_at: None,
            courier_lock_token: courier_token.to_string(),
        };
        self.assignments.save(&assignment).await?;

        order.status = OrderStatus::OfferSent;
        if let Err(err) = self.orders.save(&order).await {
            self.assignments
                .transition(
                    assignment.id,
                    AssignmentStatus::Pending,
                    AssignmentStatus::Expired,
                    Utc::now(),
                )
                .await?;
            return Err(err);
        }

        // Register the waiter before the courier can possibly answer.
        let (waiter, resolution) = oneshot::channel();
        self.open_offers.insert(assignment.id, waiter);

        self.notifier
            .send_offer_to_courier(assignment.courier_id, offer_payload(&assignment, &order));
        self.metrics.offer("sent");

        info!(
            assignment_id = %assignment.id,
            courier_id = %assignment.courier_id,
            attempt,
            surge,
            payout,
            distance_km = candidate.distance_km,
            "offer sent"
        );

        Ok(Some(SentOffer {
            assignment,
            resolution,
            sent_at: Instant::now(),
        }))
    }

    /// Waits for the courier's answer; on timeout the offer is expired unless
    /// an answer won the race, in which case that answer is returned.
    pub(super) async fn await_response(&self, sent: SentOffer) -> AppResult<OfferResolution> {
        let SentOffer {
            assignment,
            mut resolution,
            sent_at,
        } = sent;

        let answered = tokio::select! {
            answer = &mut resolution => Some(answer.unwrap_or(OfferResolution::Expired)),
            _ = sleep(self.settings.offer_timeout) => None,
        };

        let outcome = match answered {
            Some(answer) => answer,
            None => {
                if self.expire_offer(&assignment).await? {
                    OfferResolution::TimedOut
                } else {
                    // The answer won the race; its sender is about to resolve us.
                    match timeout(self.settings.order_lock_ttl, resolution).await {
                        Ok(Ok(answer)) => answer,
                        _ => OfferResolution::Expired,
                    }
                }
            }
        };

        let label = match outcome {
            OfferResolution::Accepted => "accepted",
            OfferResolution::Rejected => "rejected",
            OfferResolution::TimedOut => "timed_out",
            OfferResolution::Expired => "expired",
        };
        self.metrics
            .offer_answered(label, sent_at.elapsed().as_secs_f64());

        Ok(outcome)
    }

    /// PENDING → TIMED_OUT. Returns false when the courier answered first.
    async fn expire_offer(&self, assignment: &Assignment) -> AppResult<bool> {
        let Some(timed_out) = self
            .assignments
            .transition(
                assignment.id,
                AssignmentStatus::Pending,
                AssignmentStatus::TimedOut,
                Utc::now(),
            )
            .await?
        else {
            debug!(assignment_id = %assignment.id, "offer answered before timeout");
            return Ok(false);
        };

        self.open_offers.remove(&timed_out.id);
        info!(
            assignment_id = %timed_out.id,
            courier_id = %timed_out.courier_id,
            "offer timed out"
        );

        let refusal = self
            .record_refusal(timed_out.order_id, timed_out.courier_id)
            .await;
        self.revert_to_searching(timed_out.order_id).await;
        self.release_quietly(
            &keys::courier_busy(timed_out.courier_id),
            &timed_out.courier_lock_token,
        )
        .await;

        refusal.map(|_| true)
    }
}
