use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::LockManager;
use crate::error::AppResult;

struct Slot<T> {
    value: T,
    expires_at: Option<Instant>,
}

impl<T> Slot<T> {
    fn new(value: T, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Single-process stand-in for a Redis-style lock store.
///
/// Expiry is measured on the tokio clock, so paused-time tests drive TTLs.
#[derive(Default)]
pub struct InMemoryLockManager {
    locks: DashMap<String, Slot<String>>,
    counters: DashMap<String, Slot<i64>>,
}

impl InMemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.locks.len() + self.counters.len();
        self.locks.retain(|_, slot| slot.is_live(now));
        self.counters.retain(|_, slot| slot.is_live(now));
        let removed = before.saturating_sub(self.locks.len() + self.counters.len());
        if removed > 0 {
            debug!(removed, "purged expired lock entries");
        }
        removed
    }

    /// Current holder's token, if the lock is live.
    pub fn holder(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        self.locks
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map(|slot| slot.value.clone())
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> AppResult<bool> {
        let now = Instant::now();
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(false);
                }
                occupied.insert(Slot::new(token.to_string(), Some(ttl)));
                Ok(true)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::new(token.to_string(), Some(ttl)));
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, token: &str) -> AppResult<bool> {
        let now = Instant::now();
        let removed = self.locks.remove_if(key, |_, slot| slot.value == token);
        Ok(removed.is_some_and(|(_, slot)| slot.is_live(now)))
    }

    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> AppResult<bool> {
        let now = Instant::now();
        match self.locks.get_mut(key) {
            Some(mut slot) if slot.value == token && slot.is_live(now) => {
                slot.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_held(&self, key: &str) -> AppResult<bool> {
        Ok(self.holder(key).is_some())
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Option<Duration>) -> AppResult<i64> {
        let now = Instant::now();
        let mut slot = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| Slot::new(0, ttl));

        if !slot.is_live(now) {
            *slot = Slot::new(0, ttl);
        }
        slot.value += 1;
        Ok(slot.value)
    }

    async fn counter(&self, key: &str) -> AppResult<i64> {
        let now = Instant::now();
        Ok(self
            .counters
            .get(key)
            .filter(|slot| slot.is_live(now))
            .map_or(0, |slot| slot.value))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.locks.remove(key);
        self.counters.remove(key);
        Ok(())
    }
}
