use std::sync::Arc;

use crate::config::DispatchSettings;
use crate::engine::coordinator::{Collaborators, DispatchCoordinator};
use crate::engine::presence::CourierPresence;
use crate::engine::pricing::RiderPayoutPricing;
use crate::geo::InMemoryGeoIndex;
use crate::lock::InMemoryLockManager;
use crate::notify::BroadcastNotifier;
use crate::observability::metrics::Metrics;
use crate::store::{InMemoryAssignmentRepository, InMemoryCourierDirectory, InMemoryOrderRepository};

pub struct AppState {
    pub coordinator: Arc<DispatchCoordinator>,
    pub presence: CourierPresence,
    pub orders: Arc<InMemoryOrderRepository>,
    pub assignments: Arc<InMemoryAssignmentRepository>,
    pub couriers: Arc<InMemoryCourierDirectory>,
    pub geo: Arc<InMemoryGeoIndex>,
    pub locks: Arc<InMemoryLockManager>,
    pub notifier: Arc<BroadcastNotifier>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(settings: DispatchSettings, event_buffer_size: usize) -> Self {
        let orders = Arc::new(InMemoryOrderRepository::new());
        let assignments = Arc::new(InMemoryAssignmentRepository::new());
        let couriers = Arc::new(InMemoryCourierDirectory::new());
        let geo = Arc::new(InMemoryGeoIndex::new());
        let locks = Arc::new(InMemoryLockManager::new());
        let notifier = Arc::new(BroadcastNotifier::new(event_buffer_size));
        let metrics = Metrics::new();

        let coordinator = DispatchCoordinator::new(
            settings,
            Collaborators {
                geo: geo.clone(),
                locks: locks.clone(),
                orders: orders.clone(),
                assignments: assignments.clone(),
                couriers: couriers.clone(),
                notifier: notifier.clone(),
                pricing: Arc::new(RiderPayoutPricing::default()),
            },
            metrics.clone(),
        );

        Self {
            coordinator,
            presence: CourierPresence::new(geo.clone(), couriers.clone()),
            orders,
            assignments,
            couriers,
            geo,
            locks,
            notifier,
            metrics,
        }
    }
}
