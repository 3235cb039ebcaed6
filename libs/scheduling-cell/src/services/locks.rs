// libs/scheduling-cell/src/services/locks.rs
//
// Keyed mutual exclusion for the scheduling hot path. One registry instance
// is shared by every service; entries are created on first use and never
// removed, so a key always maps to the same mutex for the process lifetime.
//
// Lock ordering: the two creation keys are acquired as a sorted pair, and the
// service-request lock is only ever taken while already holding the
// appointment lock. That total order is what keeps concurrent creations and
// operational mutations deadlock-free.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

pub fn provider_day_key(provider_id: Uuid, day: NaiveDate) -> String {
    format!("creation:provider:{}:{}", provider_id.simple(), day)
}

pub fn request_day_key(service_request_id: Uuid, day: NaiveDate) -> String {
    format!("creation:request:{}:{}", service_request_id.simple(), day)
}

pub fn appointment_key(appointment_id: Uuid) -> String {
    format!("appointment:{}", appointment_id.simple())
}

pub fn service_request_key(service_request_id: Uuid) -> String {
    format!("request:{}", service_request_id.simple())
}

#[derive(Default)]
pub struct LockRegistry {
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Await exclusive access to `key`. The returned guard releases on drop,
    /// which covers every success, error and cancellation path.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }

    /// Acquire two keys in lexicographic order so concurrent callers touching
    /// overlapping key pairs cannot deadlock. Equal keys collapse to a single
    /// guard.
    pub async fn acquire_pair(&self, first: &str, second: &str) -> Vec<OwnedMutexGuard<()>> {
        let mut keys = vec![first, second];
        keys.sort_unstable();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.acquire(key).await);
        }
        guards
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
