//! Token-owned, TTL-bound mutual exclusion.
//!
//! Every acquire carries a TTL so a crashed holder heals on its own. Release
//! and extend only succeed for the caller holding the current token, which
//! keeps a late release from freeing a lock that rolled over to a new owner.

mod memory;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppResult;

pub use memory::InMemoryLockManager;

#[async_trait]
pub trait LockManager: Send + Sync {
    /// Atomic set-if-absent. Expired entries count as absent.
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> AppResult<bool>;

    async fn release(&self, key: &str, token: &str) -> AppResult<bool>;

    /// Pushes the expiry out to `ttl` from now, only for the current holder.
    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> AppResult<bool>;

    async fn is_held(&self, key: &str) -> AppResult<bool>;

    async fn increment_with_ttl(&self, key: &str, ttl: Option<Duration>) -> AppResult<i64>;

    async fn counter(&self, key: &str) -> AppResult<i64>;

    async fn delete(&self, key: &str) -> AppResult<()>;

    async fn increment(&self, key: &str) -> AppResult<i64> {
        self.increment_with_ttl(key, None).await
    }
}

pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

pub mod keys {
    use uuid::Uuid;

    pub fn dispatch_guard(order_id: Uuid) -> String {
        format!("dispatch_guard:{order_id}")
    }

    pub fn courier_busy(courier_id: Uuid) -> String {
        format!("courier_busy:{courier_id}")
    }

    pub fn order_lock(order_id: Uuid) -> String {
        format!("order_lock:{order_id}")
    }

    pub fn reject_cooldown(order_id: Uuid, courier_id: Uuid) -> String {
        format!("reject_cooldown:{order_id}:{courier_id}")
    }

    pub fn reject_count(order_id: Uuid, courier_id: Uuid) -> String {
        format!("reject_count:{order_id}:{courier_id}")
    }
}
