use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use courier_dispatch::config::{DispatchSettings, RejectedCourierPolicy};
use courier_dispatch::engine::coordinator::{DispatchOutcome, DispatchTicket};
use courier_dispatch::engine::pricing::{PricingAdapter, RiderPayoutPricing};
use courier_dispatch::error::AppError;
use courier_dispatch::lock::{keys, LockManager};
use courier_dispatch::models::assignment::{Assignment, AssignmentStatus, ScoreBreakdown};
use courier_dispatch::models::courier::{Courier, GeoPoint};
use courier_dispatch::models::order::{Order, OrderStatus};
use courier_dispatch::notify::{DispatchEvent, OfferPayload};
use courier_dispatch::state::AppState;
use courier_dispatch::store::{AssignmentRepository, OrderRepository};
use rand::Rng;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use uuid::Uuid;

const PICKUP: GeoPoint = GeoPoint {
    lat: 28.6200,
    lng: 77.2100,
};

struct Harness {
    state: Arc<AppState>,
    events: broadcast::Receiver<DispatchEvent>,
}

impl Harness {
    fn new(settings: DispatchSettings) -> Self {
        let state = Arc::new(AppState::new(settings, 256));
        let events = state.notifier.subscribe();
        Self { state, events }
    }

    /// Online courier roughly `km` north of the pickup point.
    async fn courier_at(&self, name: &str, km: f64) -> Courier {
        let location = GeoPoint {
            lat: PICKUP.lat + km / 111.2,
            lng: PICKUP.lng,
        };
        let courier = self.state.presence.register(name, location, 4.5).unwrap();
        self.state.presence.go_online(courier.id, None).await.unwrap()
    }

    async fn place_order(&self) -> Order {
        let order = Order::new("Spice Route", PICKUP);
        self.state.orders.save(&order).await.unwrap();
        order
    }

    async fn start(&self, order_id: Uuid) -> JoinHandle<DispatchOutcome> {
        match self.state.coordinator.dispatch(order_id).await.unwrap() {
            DispatchTicket::Started(handle) => handle,
            DispatchTicket::AlreadyInProgress => panic!("dispatch already running"),
        }
    }

    async fn next_offer(&mut self) -> (Uuid, OfferPayload) {
        let wait = async {
            loop {
                if let DispatchEvent::AssignmentRequest {
                    courier_id,
                    payload,
                } = self.events.recv().await.unwrap()
                {
                    return (courier_id, payload);
                }
            }
        };
        timeout(Duration::from_secs(600), wait)
            .await
            .expect("no offer was sent")
    }

    async fn assignment(&self, id: Uuid) -> Assignment {
        self.state.assignments.get(id).await.unwrap().unwrap()
    }

    async fn order(&self, id: Uuid) -> Order {
        self.state.orders.get(id).await.unwrap().unwrap()
    }

    fn history(&self, order_id: Uuid) -> Vec<Assignment> {
        self.state
            .assignments
            .all()
            .into_iter()
            .filter(|a| a.order_id == order_id)
            .collect()
    }
}

fn non_surge_settings(policy: RejectedCourierPolicy) -> DispatchSettings {
    DispatchSettings {
        surge_step: 0.0,
        rejected_policy: policy,
        ..DispatchSettings::default()
    }
}

#[tokio::test(start_paused = true)]
async fn sole_courier_accepts_first_offer() {
    let mut h = Harness::new(DispatchSettings::default());
    let courier = h.courier_at("Asha", 1.0).await;
    let order = h.place_order().await;

    let handle = h.start(order.id).await;
    let (offered_to, offer) = h.next_offer().await;
    assert_eq!(offered_to, courier.id);
    assert!(!offer.surge);

    let accepted = h
        .state
        .coordinator
        .respond(offer.assignment_id, courier.id, true)
        .await
        .unwrap();
    assert_eq!(accepted.status, AssignmentStatus::Accepted);

    assert_eq!(
        handle.await.unwrap(),
        DispatchOutcome::Accepted {
            courier_id: courier.id,
            assignment_id: offer.assignment_id,
        }
    );

    let order = h.order(order.id).await;
    assert_eq!(order.status, OrderStatus::RiderAccepted);
    assert_eq!(order.courier_id, Some(courier.id));

    let assignment = h.assignment(offer.assignment_id).await;
    assert_eq!(assignment.attempt, 1);
    assert_eq!(assignment.surge_multiplier, 1.0);
    let expected = RiderPayoutPricing::default().calculate_payout(
        assignment.distance_km,
        assignment.eta_min,
        1.0,
    );
    assert_eq!(order.rider_earning, Some(expected));

    // The guard is gone, the courier stays locked until delivery.
    let locks = &h.state.locks;
    assert!(!locks.is_held(&keys::dispatch_guard(order.id)).await.unwrap());
    assert_eq!(
        locks.holder(&keys::courier_busy(courier.id)),
        Some(assignment.courier_lock_token.clone())
    );
}

#[tokio::test(start_paused = true)]
async fn silent_courier_times_out_and_is_reoffered_with_surge() {
    let mut h = Harness::new(DispatchSettings::default());
    let courier = h.courier_at("Asha", 1.0).await;
    let order = h.place_order().await;

    let _handle = h.start(order.id).await;
    let (_, first) = h.next_offer().await;
    let sent_at = Instant::now();

    let (offered_to, second) = h.next_offer().await;
    assert!(sent_at.elapsed() >= Duration::from_secs(15));
    assert_eq!(offered_to, courier.id);
    assert!(second.surge);

    let first = h.assignment(first.assignment_id).await;
    let second = h.assignment(second.assignment_id).await;
    assert_eq!(first.status, AssignmentStatus::TimedOut);
    assert!(first.responded_at.is_some());
    assert_eq!(second.status, AssignmentStatus::Pending);
    assert_eq!(second.attempt, 2);
    assert!((second.surge_multiplier - 1.1).abs() < 1e-9);

    // The first offer's lock was released and a fresh one taken.
    assert_eq!(
        h.state.locks.holder(&keys::courier_busy(courier.id)),
        Some(second.courier_lock_token.clone())
    );
    assert_ne!(first.courier_lock_token, second.courier_lock_token);
}

#[tokio::test(start_paused = true)]
async fn timed_out_courier_stays_excluded_when_policy_always_excludes() {
    let settings = DispatchSettings {
        rejected_policy: RejectedCourierPolicy::AlwaysExclude,
        reject_cooldown: Duration::from_secs(120),
        ..DispatchSettings::default()
    };
    let mut h = Harness::new(settings);
    h.courier_at("Asha", 1.0).await;
    let order = h.place_order().await;

    let handle = h.start(order.id).await;
    h.next_offer().await;

    assert_eq!(
        handle.await.unwrap(),
        DispatchOutcome::Exhausted { attempts: 8 }
    );
    let history = h.history(order.id);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AssignmentStatus::TimedOut);
    assert_eq!(h.order(order.id).await.status, OrderStatus::NoRiderAvailable);
}

async fn rejecting_courier_is_skipped(policy: RejectedCourierPolicy) {
    let mut h = Harness::new(non_surge_settings(policy));
    let first_courier = h.courier_at("Asha", 1.0).await;
    let second_courier = h.courier_at("Ravi", 1.5).await;
    let order = h.place_order().await;

    let _handle = h.start(order.id).await;
    let (rejecter, offer) = h.next_offer().await;

    let rejected_at = Instant::now();
    let rejected = h
        .state
        .coordinator
        .respond(offer.assignment_id, rejecter, false)
        .await
        .unwrap();
    assert_eq!(rejected.status, AssignmentStatus::Rejected);

    let (offered_to, next) = h.next_offer().await;
    assert!(rejected_at.elapsed() < Duration::from_secs(15));
    assert_ne!(offered_to, rejecter);
    assert!([first_courier.id, second_courier.id].contains(&offered_to));
    assert_eq!(h.assignment(next.assignment_id).await.attempt, 2);

    // The rejecter's lock is free again.
    assert!(!h
        .state
        .locks
        .is_held(&keys::courier_busy(rejecter))
        .await
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn reject_redispatches_immediately_to_another_courier() {
    rejecting_courier_is_skipped(RejectedCourierPolicy::ReincludeUnderSurge).await;
}

#[tokio::test(start_paused = true)]
async fn reject_redispatches_immediately_when_always_excluding() {
    rejecting_courier_is_skipped(RejectedCourierPolicy::AlwaysExclude).await;
}

#[tokio::test(start_paused = true)]
async fn rejecting_courier_is_reoffered_once_surge_applies() {
    let mut h = Harness::new(DispatchSettings::default());
    let courier = h.courier_at("Asha", 1.0).await;
    let order = h.place_order().await;

    let _handle = h.start(order.id).await;
    let (_, offer) = h.next_offer().await;
    h.state
        .coordinator
        .respond(offer.assignment_id, courier.id, false)
        .await
        .unwrap();

    let (offered_to, again) = h.next_offer().await;
    assert_eq!(offered_to, courier.id);
    assert!(again.surge);
}

#[tokio::test(start_paused = true)]
async fn courier_hitting_max_rejects_is_not_offered_again() {
    let settings = DispatchSettings {
        reject_cooldown: Duration::from_secs(1),
        ..non_surge_settings(RejectedCourierPolicy::ReincludeUnderSurge)
    };
    let mut h = Harness::new(settings);
    let courier = h.courier_at("Asha", 1.0).await;
    let order = h.place_order().await;

    let handle = h.start(order.id).await;
    for _ in 0..2 {
        let (_, offer) = h.next_offer().await;
        h.state
            .coordinator
            .respond(offer.assignment_id, courier.id, false)
            .await
            .unwrap();
    }

    assert_eq!(
        handle.await.unwrap(),
        DispatchOutcome::Exhausted { attempts: 8 }
    );
    let history = h.history(order.id);
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|a| a.status == AssignmentStatus::Rejected));
}

#[tokio::test(start_paused = true)]
async fn no_couriers_ends_in_no_rider_available() {
    let h = Harness::new(DispatchSettings::default());
    let order = h.place_order().await;
    let started = Instant::now();

    let handle = h.start(order.id).await;
    assert_eq!(
        handle.await.unwrap(),
        DispatchOutcome::Exhausted { attempts: 8 }
    );
    assert!(started.elapsed() >= Duration::from_secs(40));

    assert_eq!(h.order(order.id).await.status, OrderStatus::NoRiderAvailable);
    assert!(h.history(order.id).is_empty());
    assert!(!h
        .state
        .locks
        .is_held(&keys::dispatch_guard(order.id))
        .await
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn stale_order_lock_delays_dispatch_until_it_expires() {
    let mut h = Harness::new(DispatchSettings::default());
    let courier = h.courier_at("Asha", 1.0).await;
    let order = h.place_order().await;
    h.state
        .locks
        .try_acquire(&keys::order_lock(order.id), "crashed-worker", Duration::from_secs(10))
        .await
        .unwrap();
    let started = Instant::now();

    let handle = h.start(order.id).await;
    let (offered_to, offer) = h.next_offer().await;
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(offered_to, courier.id);
    assert_eq!(h.assignment(offer.assignment_id).await.attempt, 1);

    h.state
        .coordinator
        .respond(offer.assignment_id, courier.id, true)
        .await
        .unwrap();
    assert!(matches!(
        handle.await.unwrap(),
        DispatchOutcome::Accepted { .. }
    ));
    assert_eq!(h.order(order.id).await.status, OrderStatus::RiderAccepted);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_waits_out_a_contended_order_lock() {
    let settings = DispatchSettings {
        max_attempts: 1,
        ..DispatchSettings::default()
    };
    let h = Harness::new(settings);
    let order = h.place_order().await;

    let handle = h.start(order.id).await;
    // Attempt 1 finds nobody and parks for the empty-retry delay.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.order(order.id).await.status, OrderStatus::SearchingRider);
    h.state
        .locks
        .try_acquire(&keys::order_lock(order.id), "crashed-worker", Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(
        handle.await.unwrap(),
        DispatchOutcome::Exhausted { attempts: 1 }
    );
    assert_eq!(h.order(order.id).await.status, OrderStatus::NoRiderAvailable);
    assert!(!h
        .state
        .locks
        .is_held(&keys::dispatch_guard(order.id))
        .await
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn contended_order_lock_frees_the_courier_and_retries_later() {
    let mut h = Harness::new(DispatchSettings::default());
    let location = GeoPoint {
        lat: PICKUP.lat + 1.0 / 111.2,
        lng: PICKUP.lng,
    };
    let courier = h.state.presence.register("Asha", location, 4.5).unwrap();
    let order = h.place_order().await;
    let started = Instant::now();

    let _handle = h.start(order.id).await;
    // Attempt 1 runs with nobody online; attempt 2 fires at 5s.
    tokio::time::sleep(Duration::from_secs(1)).await;
    h.state.presence.go_online(courier.id, None).await.unwrap();
    h.state
        .locks
        .try_acquire(
            &keys::order_lock(order.id),
            "other-worker",
            Duration::from_millis(4500),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(4500)).await;
    // Attempt 2 took the courier, hit the order lock and backed off.
    assert!(!h
        .state
        .locks
        .is_held(&keys::courier_busy(courier.id))
        .await
        .unwrap());
    assert!(h.history(order.id).is_empty());

    let (offered_to, offer) = h.next_offer().await;
    assert_eq!(offered_to, courier.id);
    assert!(started.elapsed() >= Duration::from_secs(6));
    let assignment = h.assignment(offer.assignment_id).await;
    assert_eq!(assignment.attempt, 3);
    assert_eq!(
        h.state.locks.holder(&keys::courier_busy(courier.id)),
        Some(assignment.courier_lock_token)
    );
}

#[tokio::test(start_paused = true)]
async fn open_offer_from_another_path_ends_the_loop_as_race_lost() {
    let h = Harness::new(DispatchSettings::default());
    let courier = h.courier_at("Asha", 1.0).await;
    let order = h.place_order().await;
    let foreign = Assignment {
        id: Uuid::new_v4(),
        order_id: order.id,
        courier_id: Uuid::new_v4(),
        status: AssignmentStatus::Pending,
        attempt: 1,
        surge_multiplier: 1.0,
        distance_km: 2.0,
        eta_min: 4.0,
        score: 0.0,
        score_breakdown: ScoreBreakdown {
            distance_score: 0.0,
            eta_score: 0.0,
            rating_score: 0.0,
            busy_penalty: 0.0,
        },
        expected_earning: 40.0,
        assigned_at: Utc::now(),
        responded_at: None,
        courier_lock_token: "other-worker".to_string(),
    };
    h.state.assignments.save(&foreign).await.unwrap();

    let handle = h.start(order.id).await;
    assert_eq!(handle.await.unwrap(), DispatchOutcome::RaceLost);

    let history = h.history(order.id);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, foreign.id);
    let locks = &h.state.locks;
    assert!(!locks.is_held(&keys::courier_busy(courier.id)).await.unwrap());
    assert!(!locks.is_held(&keys::order_lock(order.id)).await.unwrap());
    assert!(!locks.is_held(&keys::dispatch_guard(order.id)).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn courier_beyond_max_radius_is_never_offered() {
    let h = Harness::new(DispatchSettings::default());
    h.courier_at("Far Away", 20.0).await;
    let order = h.place_order().await;

    let handle = h.start(order.id).await;
    assert_eq!(
        handle.await.unwrap(),
        DispatchOutcome::Exhausted { attempts: 8 }
    );
    assert!(h.history(order.id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn courier_six_km_away_is_found_once_radius_widens() {
    let mut h = Harness::new(DispatchSettings::default());
    let courier = h.courier_at("Asha", 5.0).await;
    let order = h.place_order().await;

    let _handle = h.start(order.id).await;
    let (offered_to, offer) = h.next_offer().await;
    assert_eq!(offered_to, courier.id);
    // Radius is 3, 3, then 6 on the third attempt.
    assert_eq!(h.assignment(offer.assignment_id).await.attempt, 3);
}

#[tokio::test(start_paused = true)]
async fn second_dispatch_is_a_no_op_while_one_runs() {
    let h = Harness::new(DispatchSettings::default());
    let order = h.place_order().await;

    let _handle = h.start(order.id).await;
    assert!(matches!(
        h.state.coordinator.dispatch(order.id).await.unwrap(),
        DispatchTicket::AlreadyInProgress
    ));
}

#[tokio::test(start_paused = true)]
async fn late_accept_after_timeout_is_a_conflict() {
    let mut h = Harness::new(DispatchSettings::default());
    let courier = h.courier_at("Asha", 1.0).await;
    let order = h.place_order().await;

    let _handle = h.start(order.id).await;
    let (_, first) = h.next_offer().await;
    h.next_offer().await;

    let err = h
        .state
        .coordinator
        .respond(first.assignment_id, courier.id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
    assert_eq!(
        h.assignment(first.assignment_id).await.status,
        AssignmentStatus::TimedOut
    );
    assert_eq!(h.order(order.id).await.status, OrderStatus::OfferSent);
}

#[tokio::test(start_paused = true)]
async fn cancel_expires_open_offer_and_stops_the_loop() {
    let mut h = Harness::new(DispatchSettings::default());
    let courier = h.courier_at("Asha", 1.0).await;
    let order = h.place_order().await;

    let handle = h.start(order.id).await;
    let (_, offer) = h.next_offer().await;

    let cancelled = h.state.coordinator.cancel_order(order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    assert_eq!(
        handle.await.unwrap(),
        DispatchOutcome::OrderClosed {
            status: OrderStatus::Cancelled
        }
    );
    assert_eq!(
        h.assignment(offer.assignment_id).await.status,
        AssignmentStatus::Expired
    );
    assert!(!h
        .state
        .locks
        .is_held(&keys::courier_busy(courier.id))
        .await
        .unwrap());

    let err = h
        .state
        .coordinator
        .respond(offer.assignment_id, courier.id, true)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test(start_paused = true)]
async fn delivery_frees_the_courier() {
    let mut h = Harness::new(DispatchSettings::default());
    let courier = h.courier_at("Asha", 1.0).await;
    let order = h.place_order().await;

    let handle = h.start(order.id).await;
    let (_, offer) = h.next_offer().await;
    h.state
        .coordinator
        .respond(offer.assignment_id, courier.id, true)
        .await
        .unwrap();
    handle.await.unwrap();

    let err = h.state.coordinator.mark_delivered(order.id).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let picked = h.state.coordinator.mark_picked_up(order.id).await.unwrap();
    assert_eq!(picked.status, OrderStatus::PickedUp);
    let delivered = h.state.coordinator.mark_delivered(order.id).await.unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);

    assert!(!h
        .state
        .locks
        .is_held(&keys::courier_busy(courier.id))
        .await
        .unwrap());
    let err = h.state.coordinator.cancel_order(order.id).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test(start_paused = true)]
async fn acceptance_clears_refusal_bookkeeping() {
    let mut h = Harness::new(non_surge_settings(RejectedCourierPolicy::AlwaysExclude));
    h.courier_at("Asha", 1.0).await;
    h.courier_at("Ravi", 1.5).await;
    let order = h.place_order().await;

    let handle = h.start(order.id).await;
    let (rejecter, offer) = h.next_offer().await;
    h.state
        .coordinator
        .respond(offer.assignment_id, rejecter, false)
        .await
        .unwrap();
    let (acceptor, offer) = h.next_offer().await;
    h.state
        .coordinator
        .respond(offer.assignment_id, acceptor, true)
        .await
        .unwrap();
    handle.await.unwrap();

    let locks = &h.state.locks;
    assert_eq!(
        locks
            .counter(&keys::reject_count(order.id, rejecter))
            .await
            .unwrap(),
        0
    );
    assert!(!locks
        .is_held(&keys::reject_cooldown(order.id, rejecter))
        .await
        .unwrap());
}

#[tokio::test(start_paused = true)]
async fn pending_offers_lists_open_offer_for_the_courier() {
    let mut h = Harness::new(DispatchSettings::default());
    let courier = h.courier_at("Asha", 1.0).await;
    let order = h.place_order().await;

    let _handle = h.start(order.id).await;
    let (_, offer) = h.next_offer().await;

    let pending = h
        .state
        .coordinator
        .pending_offers_for_courier(courier.id)
        .await
        .unwrap();
    assert_eq!(pending, vec![offer]);
    assert!(h
        .state
        .coordinator
        .pending_offers_for_courier(Uuid::new_v4())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_finalize_exactly_once() {
    let mut h = Harness::new(DispatchSettings::default());
    let courier = h.courier_at("Asha", 1.0).await;
    let order = h.place_order().await;

    let handle = h.start(order.id).await;
    let (_, offer) = h.next_offer().await;

    let courier_id = courier.id;
    let assignment_id = offer.assignment_id;
    let attempts: Vec<_> = (0..2)
        .map(|_| {
            let coordinator = h.state.coordinator.clone();
            tokio::spawn(async move { coordinator.respond(assignment_id, courier_id, true).await })
        })
        .collect();

    let mut accepted = 0;
    let mut conflicts = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(assignment) => {
                assert_eq!(assignment.status, AssignmentStatus::Accepted);
                accepted += 1;
            }
            Err(AppError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((accepted, conflicts), (1, 1));

    assert!(matches!(
        handle.await.unwrap(),
        DispatchOutcome::Accepted { .. }
    ));
    let history = h.history(order.id);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AssignmentStatus::Accepted);
    assert_eq!(h.order(order.id).await.courier_id, Some(courier.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn offers_never_overlap_under_random_responses() {
    let settings = DispatchSettings {
        offer_timeout: Duration::from_millis(150),
        empty_retry_delay: Duration::from_millis(20),
        contention_retry_delay: Duration::from_millis(10),
        shortlist_busy_retry_delay: Duration::from_millis(20),
        reject_cooldown: Duration::from_millis(100),
        response_lock_backoff: Duration::from_millis(5),
        ..DispatchSettings::default()
    };
    let max_attempts = settings.max_attempts as usize;
    let h = Harness::new(settings);

    for i in 0..5 {
        h.courier_at(&format!("courier-{i}"), 0.5 + f64::from(i) * 0.4)
            .await;
    }

    let mut responder_events = h.state.notifier.subscribe();
    let coordinator = h.state.coordinator.clone();
    let responder = tokio::spawn(async move {
        while let Ok(event) = responder_events.recv().await {
            let DispatchEvent::AssignmentRequest {
                courier_id,
                payload,
            } = event
            else {
                continue;
            };
            let (choice, delay_ms) = {
                let mut rng = rand::thread_rng();
                (rng.gen_range(0..10), rng.gen_range(0..60))
            };
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                match choice {
                    0..=4 => {
                        let _ = coordinator
                            .respond(payload.assignment_id, courier_id, true)
                            .await;
                    }
                    5..=7 => {
                        let _ = coordinator
                            .respond(payload.assignment_id, courier_id, false)
                            .await;
                    }
                    _ => {}
                }
            });
        }
    });

    let mut orders = Vec::new();
    let mut handles = Vec::new();
    for _ in 0..6 {
        let order = h.place_order().await;
        handles.push(h.start(order.id).await);
        orders.push(order.id);
    }
    for handle in handles {
        timeout(Duration::from_secs(30), handle)
            .await
            .expect("dispatch loop did not finish")
            .unwrap();
    }
    responder.abort();

    let all = h.state.assignments.all();

    for order_id in &orders {
        let history: Vec<&Assignment> = all.iter().filter(|a| a.order_id == *order_id).collect();
        assert!(history.len() <= max_attempts);
        assert!(history.iter().all(|a| a.status != AssignmentStatus::Pending));

        // Each offer was closed before the next one for the same order went out.
        for pair in history.windows(2) {
            let closed_at = pair[0].responded_at.expect("closed offer has a response time");
            assert!(closed_at <= pair[1].assigned_at);
        }

        let accepted: Vec<_> = history
            .iter()
            .filter(|a| a.status == AssignmentStatus::Accepted)
            .collect();
        let order = h.order(*order_id).await;
        match order.courier_id {
            Some(courier_id) => {
                assert_eq!(accepted.len(), 1);
                assert_eq!(accepted[0].courier_id, courier_id);
                assert_eq!(order.status, OrderStatus::RiderAccepted);
            }
            None => {
                assert!(accepted.is_empty());
                assert_eq!(order.status, OrderStatus::NoRiderAvailable);
            }
        }
    }

    // A courier never holds two offers at once and gets nothing after accepting.
    let mut by_courier: HashMap<Uuid, Vec<&Assignment>> = HashMap::new();
    for assignment in &all {
        by_courier.entry(assignment.courier_id).or_default().push(assignment);
    }
    for history in by_courier.values() {
        for pair in history.windows(2) {
            assert_ne!(pair[0].status, AssignmentStatus::Accepted);
            let closed_at = pair[0].responded_at.expect("closed offer has a response time");
            assert!(closed_at <= pair[1].assigned_at);
        }
    }
}
