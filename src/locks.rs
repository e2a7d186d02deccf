//! Keyed async locks for identifier values and actors.
//!
//! Two signals claiming the same `(brand, type, value)` serialize through
//! the key derived from that tuple; a merge holds the keys of both actors.
//! Signals that share no key run fully in parallel.
//!
//! Acquisition is bounded: `try_lock` with capped exponential backoff plus
//! jitter, so no operation blocks indefinitely. Multi-key acquisition
//! sorts keys first, giving every caller the same global order and ruling
//! out deadlock.
//!
//! Slots are evicted when the last interested task lets go, so the table
//! tracks only keys currently locked or contended, not every key ever
//! seen.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::LockConfig;
use crate::error::LockError;
use crate::index::IndexKey;

type SlotMap = Arc<Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>>;

/// Stable lock key for an identifier value
pub fn value_key(key: &IndexKey) -> u64 {
    let mut hasher = DefaultHasher::new();
    "identifier".hash(&mut hasher);
    key.brand_id.hash(&mut hasher);
    key.id_type.hash(&mut hasher);
    key.value.hash(&mut hasher);
    hasher.finish()
}

/// Stable lock key for an actor
pub fn actor_key(actor_id: &Uuid) -> u64 {
    let mut hasher = DefaultHasher::new();
    "actor".hash(&mut hasher);
    actor_id.hash(&mut hasher);
    hasher.finish()
}

/// Guard over one key. Releasing it also drops the slot from the table
/// when no other task is holding or waiting on the same key.
#[derive(Debug)]
pub struct KeyGuard {
    slots: SlotMap,
    key: u64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release the key before inspecting the slot's reference count
        self.guard.take();
        // The table lock covers both the count check and the removal, and
        // waiters clone the slot only under the same table lock, so a
        // count of 1 means the map holds the sole reference.
        if let Ok(mut slots) = self.slots.lock() {
            if slots.get(&self.key).map(Arc::strong_count) == Some(1) {
                slots.remove(&self.key);
            }
        }
    }
}

/// Guard over a set of keys; released on drop
pub struct KeySetGuard {
    _guards: Vec<KeyGuard>,
}

/// In-process keyed lock manager
pub struct LockManager {
    slots: SlotMap,
    config: LockConfig,
}

impl LockManager {
    pub fn new(config: LockConfig) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            config,
        }
    }

    fn slot(&self, key: u64) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().expect("lock table poisoned");
        slots
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire one key with bounded wait.
    ///
    /// Backoff doubles per attempt up to the configured ceiling, with up
    /// to 50% random jitter so contending workers desynchronize.
    pub async fn acquire(&self, key: u64) -> Result<KeyGuard, LockError> {
        let slot = self.slot(key);
        for attempt in 0..self.config.max_attempts {
            if let Ok(guard) = slot.clone().try_lock_owned() {
                return Ok(KeyGuard {
                    slots: self.slots.clone(),
                    key,
                    guard: Some(guard),
                });
            }
            let step = self
                .config
                .base_backoff_ms
                .saturating_mul(1u64 << attempt.min(16))
                .min(self.config.max_backoff_ms);
            let jitter = rand::thread_rng().gen_range(0..=step / 2 + 1);
            debug!(key, attempt, "lock contended, backing off");
            tokio::time::sleep(Duration::from_millis(step + jitter)).await;
        }
        warn!(key, attempts = self.config.max_attempts, "lock acquisition exhausted");
        Err(LockError::Timeout {
            key,
            attempts: self.config.max_attempts,
        })
    }

    /// Acquire a set of keys in deterministic (sorted, de-duplicated)
    /// order. On any timeout the keys already held are released.
    pub async fn acquire_all(&self, keys: &[u64]) -> Result<KeySetGuard, LockError> {
        let mut sorted: Vec<u64> = keys.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.acquire(key).await?);
        }
        Ok(KeySetGuard { _guards: guards })
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().expect("lock table poisoned").len()
    }
}
