// libs/appointment-cell/src/services/locks.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

type LockKey = (Uuid, Uuid);
type Registry = Arc<Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>>;

/// Per-staff scheduling locks.
///
/// The guard is held across the overlap check and the write, so two bookings
/// for the same practitioner cannot both pass the conflict check. Entries are
/// dropped from the registry once nobody holds or waits on them.
#[derive(Debug, Default)]
pub struct StaffLocks {
    locks: Registry,
}

/// Held scheduling lock for one (clinic, staff) pair.
#[derive(Debug)]
pub struct StaffLockGuard {
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
    registry: Registry,
}

/// Guards from [`StaffLocks::acquire_pair`]; the second is `None` when both staff ids match.
pub type StaffLockPair = (StaffLockGuard, Option<StaffLockGuard>);

impl StaffLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, clinic_id: Uuid, staff_id: Uuid) -> StaffLockGuard {
        let key = (clinic_id, staff_id);
        // Cloned under the registry lock, so pruning sees this waiter.
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(key).or_default().clone()
        };

        debug!("Acquiring scheduling lock for staff {} in clinic {}", staff_id, clinic_id);
        StaffLockGuard {
            key,
            guard: Some(lock.lock_owned().await),
            registry: Arc::clone(&self.locks),
        }
    }

    /// Acquire two staff locks in a fixed order, for reassignment between practitioners.
    pub async fn acquire_pair(&self, clinic_id: Uuid, first: Uuid, second: Uuid) -> StaffLockPair {
        if first == second {
            return (self.acquire(clinic_id, first).await, None);
        }

        let (low, high) = if first < second { (first, second) } else { (second, first) };
        let low_guard = self.acquire(clinic_id, low).await;
        let high_guard = self.acquire(clinic_id, high).await;
        (low_guard, Some(high_guard))
    }

    /// Number of (clinic, staff) pairs currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for StaffLockGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the registry's own handle left: no holder and no waiter.
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}
