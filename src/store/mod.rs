mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::courier::Courier;
use crate::models::order::Order;

pub use memory::{InMemoryAssignmentRepository, InMemoryCourierDirectory, InMemoryOrderRepository};

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> AppResult<Option<Order>>;

    async fn save(&self, order: &Order) -> AppResult<()>;
}

#[async_trait]
pub trait AssignmentRepository: Send + Sync {
    async fn save(&self, assignment: &Assignment) -> AppResult<()>;

    async fn get(&self, id: Uuid) -> AppResult<Option<Assignment>>;

    async fn find_pending_for_order(&self, order_id: Uuid) -> AppResult<Option<Assignment>>;

    async fn find_by_order_and_statuses(
        &self,
        order_id: Uuid,
        statuses: &[AssignmentStatus],
    ) -> AppResult<Vec<Assignment>>;

    async fn find_by_courier_and_status(
        &self,
        courier_id: Uuid,
        status: AssignmentStatus,
    ) -> AppResult<Vec<Assignment>>;

    /// Compare-and-set on the status. Returns the updated record when the
    /// assignment was in `from`, `None` when another path already moved it.
    async fn transition(
        &self,
        id: Uuid,
        from: AssignmentStatus,
        to: AssignmentStatus,
        responded_at: DateTime<Utc>,
    ) -> AppResult<Option<Assignment>>;
}

#[async_trait]
pub trait CourierDirectory: Send + Sync {
    async fn get(&self, id: Uuid) -> AppResult<Option<Courier>>;

    async fn get_many(&self, ids: &[Uuid]) -> AppResult<Vec<Courier>>;
}
