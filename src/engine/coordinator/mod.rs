//! Courier locks are always taken before the order lock and released after it.

mod lifecycle;
mod offer;
mod response;

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::DispatchSettings;
use crate::engine::escalation;
use crate::engine::pricing::PricingAdapter;
use crate::engine::scoring::{self, ScoredCandidate};
use crate::error::{AppError, AppResult};
use crate::geo::{haversine_km, GeoIndex};
use crate::lock::{self, keys, LockManager};
use crate::models::order::{Order, OrderStatus};
use crate::notify::NotificationChannel;
use crate::observability::metrics::Metrics;
use crate::store::{AssignmentRepository, CourierDirectory, OrderRepository};

use self::offer::OfferOutcome;

const COOLDOWN_TOKEN: &str = "cooldown";

#[derive(Clone)]
pub struct Collaborators {
    pub geo: Arc<dyn GeoIndex>,
    pub locks: Arc<dyn LockManager>,
    pub orders: Arc<dyn OrderRepository>,
    pub assignments: Arc<dyn AssignmentRepository>,
    pub couriers: Arc<dyn CourierDirectory>,
    pub notifier: Arc<dyn NotificationChannel>,
    pub pricing: Arc<dyn PricingAdapter>,
}

pub enum DispatchTicket {
    Started(JoinHandle<DispatchOutcome>),
    AlreadyInProgress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Accepted { courier_id: Uuid, assignment_id: Uuid },
    AlreadyAssigned,
    OrderGone,
    OrderClosed { status: OrderStatus },
    RaceLost,
    Exhausted { attempts: u32 },
    GuardLost,
    Failed { reason: String },
}

impl DispatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Accepted { .. } => "accepted",
            DispatchOutcome::AlreadyAssigned => "already_assigned",
            DispatchOutcome::OrderGone => "order_gone",
            DispatchOutcome::OrderClosed { .. } => "order_closed",
            DispatchOutcome::RaceLost => "race_lost",
            DispatchOutcome::Exhausted { .. } => "exhausted",
            DispatchOutcome::GuardLost => "guard_lost",
            DispatchOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OfferResolution {
    Accepted,
    Rejected,
    TimedOut,
    Expired,
}

pub struct DispatchCoordinator {
    settings: DispatchSettings,
    geo: Arc<dyn GeoIndex>,
    locks: Arc<dyn LockManager>,
    orders: Arc<dyn OrderRepository>,
    assignments: Arc<dyn AssignmentRepository>,
    couriers: Arc<dyn CourierDirectory>,
    notifier: Arc<dyn NotificationChannel>,
    pricing: Arc<dyn PricingAdapter>,
    metrics: Metrics,
    guards: DashMap<Uuid, String>,
    open_offers: DashMap<Uuid, oneshot::Sender<OfferResolution>>,
}

impl DispatchCoordinator {
    pub fn new(settings: DispatchSettings, deps: Collaborators, metrics: Metrics) -> Arc<Self> {
        Arc::new(Self {
            settings,
            geo: deps.geo,
            locks: deps.locks,
            orders: deps.orders,
            assignments: deps.assignments,
            couriers: deps.couriers,
            notifier: deps.notifier,
            pricing: deps.pricing,
            metrics,
            guards: DashMap::new(),
            open_offers: DashMap::new(),
        })
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Returns `AlreadyInProgress` when another loop holds the dispatch guard.
    pub async fn dispatch(self: &Arc<Self>, order_id: Uuid) -> AppResult<DispatchTicket> {
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("order {order_id} not found")))?;
        if order.status.is_terminal() {
            return Err(AppError::BadRequest(format!(
                "order {order_id} is {:?} and cannot be dispatched",
                order.status
            )));
        }

        let token = lock::new_token();
        let guard_key = keys::dispatch_guard(order_id);
        if !self
            .locks
            .try_acquire(&guard_key, &token, self.settings.guard_ttl)
            .await?
        {
            info!(order_id = %order_id, "dispatch already in progress");
            return Ok(DispatchTicket::AlreadyInProgress);
        }

        self.guards.insert(order_id, token.clone());
        self.metrics.active_dispatch_loops.inc();
        info!(order_id = %order_id, "dispatch started");

        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(
            async move {
                let outcome = coordinator.run_loop(order_id, &token).await;
                coordinator.metrics.active_dispatch_loops.dec();
                coordinator
                    .metrics
                    .dispatch_cycles_total
                    .with_label_values(&[outcome.label()])
                    .inc();
                outcome
            }
            .instrument(info_span!("dispatch", order_id = %order_id)),
        );

        Ok(DispatchTicket::Started(handle))
    }

    async fn run_loop(&self, order_id: Uuid, guard_token: &str) -> DispatchOutcome {
        let outcome = match self.drive(order_id, guard_token).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(error = %err, "dispatch loop failed");
                DispatchOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };

        // On acceptance the accepting path owns the guard release.
        if !matches!(outcome, DispatchOutcome::Accepted { .. }) {
            self.release_guard(order_id, guard_token).await;
        }

        info!(outcome = outcome.label(), "dispatch finished");
        outcome
    }

    async fn drive(&self, order_id: Uuid, guard_token: &str) -> AppResult<DispatchOutcome> {
        let guard_key = keys::dispatch_guard(order_id);
        let mut radius_km = self.settings.initial_radius_km;
        let mut attempt: u32 = 0;

        self.begin_search(order_id).await?;

        loop {
            attempt += 1;
            if attempt > self.settings.max_attempts {
                self.mark_no_rider_available(order_id).await?;
                warn!(
                    attempts = self.settings.max_attempts,
                    "no courier found, manual attention required"
                );
                return Ok(DispatchOutcome::Exhausted {
                    attempts: self.settings.max_attempts,
                });
            }

            if !self
                .locks
                .extend(&guard_key, guard_token, self.settings.guard_ttl)
                .await?
            {
                warn!("dispatch guard lost, stopping");
                return Ok(DispatchOutcome::GuardLost);
            }

            let surge = escalation::surge_for_attempt(&self.settings, attempt);
            radius_km = escalation::radius_for_attempt(&self.settings, attempt, radius_km);

            let Some(order) = self.orders.get(order_id).await? else {
                info!("order no longer exists, stopping");
                return Ok(DispatchOutcome::OrderGone);
            };
            if order.has_courier() {
                info!("order already has a courier, stopping");
                return Ok(DispatchOutcome::AlreadyAssigned);
            }
            if !order.status.is_dispatchable() {
                info!(status = ?order.status, "order closed, stopping");
                return Ok(DispatchOutcome::OrderClosed {
                    status: order.status,
                });
            }

            info!(attempt, radius_km, surge, "dispatch step");

            let ranked = self.find_candidates(&order, radius_km, surge).await?;
            if ranked.is_empty() {
                info!(attempt, "no eligible couriers, retrying later");
                sleep(self.settings.empty_retry_delay).await;
                continue;
            }

            let shortlist = scoring::shortlist(ranked, self.settings.shortlist_size);
            match self.attempt_assignment(&order, shortlist, attempt, surge).await? {
                OfferOutcome::Sent(sent) => {
                    let assignment = sent.assignment.clone();
                    match self.await_response(sent).await? {
                        OfferResolution::Accepted => {
                            return Ok(DispatchOutcome::Accepted {
                                courier_id: assignment.courier_id,
                                assignment_id: assignment.id,
                            });
                        }
                        resolution => {
                            debug!(?resolution, assignment_id = %assignment.id, "offer closed");
                        }
                    }
                }
                OfferOutcome::ShortlistBusy => {
                    debug!("every shortlisted courier became busy");
                    sleep(self.settings.shortlist_busy_retry_delay).await;
                }
                OfferOutcome::OrderLocked => {
                    debug!("order lock contended");
                    sleep(self.settings.contention_retry_delay).await;
                }
                OfferOutcome::RaceLost => {
                    debug!("order claimed by another path");
                    return Ok(DispatchOutcome::RaceLost);
                }
            }
        }
    }

    async fn find_candidates(
        &self,
        order: &Order,
        radius_km: f64,
        surge: f64,
    ) -> AppResult<Vec<ScoredCandidate>> {
        let nearby = self
            .geo
            .find_nearby(order.pickup, radius_km, self.settings.candidate_limit)
            .await?;
        let check_refusals = escalation::applies_refusal_exclusions(&self.settings, surge);

        let mut eligible = Vec::with_capacity(nearby.len());
        for courier_id in nearby {
            if self.locks.is_held(&keys::courier_busy(courier_id)).await? {
                continue;
            }
            if check_refusals && self.has_refused(order.id, courier_id).await? {
                continue;
            }
            eligible.push(courier_id);
        }

        let candidates = self
            .couriers
            .get_many(&eligible)
            .await?
            .into_iter()
            .filter(|courier| courier.online)
            .map(|courier| {
                let distance_km = haversine_km(&courier.location, &order.pickup);
                let eta_min = escalation::eta_minutes(&self.settings, distance_km);
                let (score, breakdown) = scoring::score_courier(&courier, distance_km, eta_min);
                ScoredCandidate {
                    courier,
                    distance_km,
                    eta_min,
                    score,
                    breakdown,
                }
            })
            .collect();

        Ok(scoring::rank(candidates))
    }

    async fn has_refused(&self, order_id: Uuid, courier_id: Uuid) -> AppResult<bool> {
        if self
            .locks
            .is_held(&keys::reject_cooldown(order_id, courier_id))
            .await?
        {
            return Ok(true);
        }
        let rejects = self
            .locks
            .counter(&keys::reject_count(order_id, courier_id))
            .await?;
        Ok(rejects >= self.settings.max_rejects)
    }

    async fn record_refusal(&self, order_id: Uuid, courier_id: Uuid) -> AppResult<()> {
        self.locks
            .increment_with_ttl(
                &keys::reject_count(order_id, courier_id),
                Some(self.settings.reject_count_ttl),
            )
            .await?;

        let cooldown_key = keys::reject_cooldown(order_id, courier_id);
        let cooldown = self.settings.reject_cooldown;
        if !self
            .locks
            .try_acquire(&cooldown_key, COOLDOWN_TOKEN, cooldown)
            .await?
        {
            self.locks
                .extend(&cooldown_key, COOLDOWN_TOKEN, cooldown)
                .await?;
        }
        Ok(())
    }

    async fn begin_search(&self, order_id: Uuid) -> AppResult<()> {
        self.update_order_patiently(order_id, |order| {
            if matches!(
                order.status,
                OrderStatus::Placed | OrderStatus::NoRiderAvailable
            ) && !order.has_courier()
            {
                order.status = OrderStatus::SearchingRider;
                true
            } else {
                false
            }
        })
        .await
        .map(|_| ())
    }

    async fn mark_no_rider_available(&self, order_id: Uuid) -> AppResult<()> {
        self.update_order_patiently(order_id, |order| {
            if order.status.is_dispatchable() && !order.has_courier() {
                order.status = OrderStatus::NoRiderAvailable;
                true
            } else {
                false
            }
        })
        .await
        .map(|_| ())
    }

    async fn revert_to_searching(&self, order_id: Uuid) {
        let result = self
            .update_order_locked(order_id, |order| {
                if order.status == OrderStatus::OfferSent && !order.has_courier() {
                    order.status = OrderStatus::SearchingRider;
                    true
                } else {
                    false
                }
            })
            .await;
        if let Err(err) = result {
            warn!(order_id = %order_id, error = %err, "could not revert order to searching");
        }
    }

    /// Order writes made by the loop itself. A contended order lock is retried
    /// until any abandoned holder's TTL has run out.
    async fn update_order_patiently(
        &self,
        order_id: Uuid,
        change: impl Fn(&mut Order) -> bool + Send + Sync,
    ) -> AppResult<Option<Order>> {
        let deadline =
            Instant::now() + self.settings.order_lock_ttl + self.settings.contention_retry_delay;
        loop {
            match self.update_order_locked(order_id, &change).await {
                Err(AppError::Busy(reason)) if Instant::now() < deadline => {
                    debug!(reason = %reason, "order lock contended, retrying");
                    sleep(self.settings.contention_retry_delay).await;
                }
                other => return other,
            }
        }
    }

    /// Read-modify-write of an order under its `order_lock`. `change` returns
    /// whether anything needs saving.
    async fn update_order_locked(
        &self,
        order_id: Uuid,
        change: impl FnOnce(&mut Order) -> bool + Send,
    ) -> AppResult<Option<Order>> {
        let token = self.lock_order(order_id).await?;
        let result: AppResult<Option<Order>> = async move {
            let Some(mut order) = self.orders.get(order_id).await? else {
                return Ok(None);
            };
            if change(&mut order) {
                self.orders.save(&order).await?;
            }
            Ok(Some(order))
        }
        .await;
        self.unlock_order(order_id, &token).await;
        result
    }

    async fn lock_order(&self, order_id: Uuid) -> AppResult<String> {
        let key = keys::order_lock(order_id);
        let token = lock::new_token();
        for _ in 0..self.settings.response_lock_attempts.max(1) {
            if self
                .locks
                .try_acquire(&key, &token, self.settings.order_lock_ttl)
                .await?
            {
                return Ok(token);
            }
            sleep(self.settings.response_lock_backoff).await;
        }
        Err(AppError::Busy(format!(
            "order {order_id} is being updated, retry"
        )))
    }

    async fn unlock_order(&self, order_id: Uuid, token: &str) {
        self.release_quietly(&keys::order_lock(order_id), token).await;
    }

    async fn release_guard(&self, order_id: Uuid, token: &str) {
        self.guards.remove_if(&order_id, |_, held| held == token);
        self.release_quietly(&keys::dispatch_guard(order_id), token)
            .await;
    }

    async fn release_quietly(&self, key: &str, token: &str) {
        match self.locks.release(key, token).await {
            Ok(true) => {}
            Ok(false) => debug!(key, "lock already released or expired"),
            Err(err) => warn!(key, error = %err, "failed to release lock"),
        }
    }

    fn resolve_offer(&self, assignment_id: Uuid, resolution: OfferResolution) -> bool {
        self.open_offers
            .remove(&assignment_id)
            .is_some_and(|(_, waiter)| waiter.send(resolution).is_ok())
    }
}
