use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::{AssignmentRepository, CourierDirectory, OrderRepository};
use crate::error::AppResult;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::courier::Courier;
use crate::models::order::Order;

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: DashMap<Uuid, Order>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn get(&self, id: Uuid) -> AppResult<Option<Order>> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn save(&self, order: &Order) -> AppResult<()> {
        let mut order = order.clone();
        order.updated_at = Utc::now();
        self.orders.insert(order.id, order);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAssignmentRepository {
    assignments: DashMap<Uuid, Assignment>,
}

impl InMemoryAssignmentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn all(&self) -> Vec<Assignment> {
        let mut all: Vec<Assignment> = self
            .assignments
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|a| a.assigned_at);
        all
    }

    fn collect_where(&self, keep: impl Fn(&Assignment) -> bool) -> Vec<Assignment> {
        let mut hits: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        hits.sort_by_key(|a| a.assigned_at);
        hits
    }
}

#[async_trait]
impl AssignmentRepository for InMemoryAssignmentRepository {
    async fn save(&self, assignment: &Assignment) -> AppResult<()> {
        self.assignments.insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<Assignment>> {
        Ok(self.assignments.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_pending_for_order(&self, order_id: Uuid) -> AppResult<Option<Assignment>> {
        Ok(self
            .collect_where(|a| a.order_id == order_id && a.status.is_open())
            .into_iter()
            .next())
    }

    async fn find_by_order_and_statuses(
        &self,
        order_id: Uuid,
        statuses: &[AssignmentStatus],
    ) -> AppResult<Vec<Assignment>> {
        Ok(self.collect_where(|a| a.order_id == order_id && statuses.contains(&a.status)))
    }

    async fn find_by_courier_and_status(
        &self,
        courier_id: Uuid,
        status: AssignmentStatus,
    ) -> AppResult<Vec<Assignment>> {
        Ok(self.collect_where(|a| a.courier_id == courier_id && a.status == status))
    }

    async fn transition(
        &self,
        id: Uuid,
        from: AssignmentStatus,
        to: AssignmentStatus,
        responded_at: DateTime<Utc>,
    ) -> AppResult<Option<Assignment>> {
        let Some(mut entry) = self.assignments.get_mut(&id) else {
            return Ok(None);
        };
        if entry.status != from {
            return Ok(None);
        }
        entry.status = to;
        entry.responded_at = Some(responded_at);
        Ok(Some(entry.value().clone()))
    }
}

/// Courier profile stand-in; the real profile store lives elsewhere.
#[derive(Default)]
pub struct InMemoryCourierDirectory {
    couriers: DashMap<Uuid, Courier>,
}

impl InMemoryCourierDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, courier: Courier) {
        self.couriers.insert(courier.id, courier);
    }

    pub fn update(&self, id: Uuid, change: impl FnOnce(&mut Courier)) -> Option<Courier> {
        let mut courier = self.couriers.get_mut(&id)?;
        change(courier.value_mut());
        courier.updated_at = Utc::now();
        Some(courier.value().clone())
    }

    pub fn list(&self) -> Vec<Courier> {
        self.couriers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.couriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.couriers.is_empty()
    }
}

#[async_trait]
impl CourierDirectory for InMemoryCourierDirectory {
    async fn get(&self, id: Uuid) -> AppResult<Option<Courier>> {
        Ok(self.couriers.get(&id).map(|entry| entry.value().clone()))
    }

    async fn get_many(&self, ids: &[Uuid]) -> AppResult<Vec<Courier>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.couriers.get(id).map(|entry| entry.value().clone()))
            .collect())
    }
}
