use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = HashMap<String, Arc<AsyncMutex<()>>>;

/// One async mutex per machine id, created on first use and dropped again
/// when the last holder releases it.
///
/// Held across the validate → hardware → commit sequence of a start, and by
/// the reservation sweeper, so the two never interleave on one machine.
/// Unrelated machines never contend.
#[derive(Debug, Default)]
pub struct MachineLocks {
    locks: Mutex<Registry>,
}

impl MachineLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, machine_id: &str) -> MachineLockGuard<'_> {
        let lock = Arc::clone(self.registry().entry(machine_id.to_string()).or_default());
        MachineLockGuard {
            locks: self,
            machine_id: machine_id.to_string(),
            _held: lock.lock_owned().await,
        }
    }

    /// Number of machine ids with a live lock entry.
    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.locks.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Exclusive hold on one machine. Dropping it releases the machine.
#[derive(Debug)]
pub struct MachineLockGuard<'a> {
    locks: &'a MachineLocks,
    machine_id: String,
    _held: OwnedMutexGuard<()>,
}

impl Drop for MachineLockGuard<'_> {
    fn drop(&mut self) {
        // The registry and this guard own the only two references when no
        // one else is holding or waiting. Waiters clone under the same mutex.
        let mut registry = self.locks.registry();
        if registry
            .get(&self.machine_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            registry.remove(&self.machine_id);
        }
    }
}
