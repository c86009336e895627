use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{CasOutcome, StoreError};
use crate::state_machine::{Machine, MachineStatus};

/// Plain in-process machine table shared by the store backends.
///
/// Not synchronized; the owning store wraps it in a lock.
#[derive(Debug, Default, Clone)]
pub(crate) struct MachineTable {
    machines: HashMap<String, Machine>,
}

/// On-disk layout of a table snapshot.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub machines: Vec<Machine>,
}

impl MachineTable {
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let machines = snapshot
            .machines
            .into_iter()
            .map(|m| (m.machine_id.clone(), m))
            .collect();
        Self { machines }
    }

    pub fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            machines: self.all(),
        }
    }

    pub fn at_location(&self, location_id: &str) -> Vec<Machine> {
        let mut found: Vec<Machine> = self
            .machines
            .values()
            .filter(|m| m.location_id == location_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.machine_id.cmp(&b.machine_id));
        found
    }

    pub fn get(&self, machine_id: &str) -> Option<Machine> {
        self.machines.get(machine_id).cloned()
    }

    pub fn all(&self) -> Vec<Machine> {
        let mut all: Vec<Machine> = self.machines.values().cloned().collect();
        all.sort_by(|a, b| {
            a.location_id
                .cmp(&b.location_id)
                .then_with(|| a.machine_id.cmp(&b.machine_id))
        });
        all
    }

    /// Apply `edit` to a stored machine, stamping version and time.
    /// Returns `(previous, committed)`.
    pub fn update_with(
        &mut self,
        machine_id: &str,
        edit: impl FnOnce(&mut Machine),
    ) -> Result<(Machine, Machine), StoreError> {
        let stored = self
            .machines
            .get_mut(machine_id)
            .ok_or_else(|| StoreError::NotFound(machine_id.to_string()))?;
        let previous = stored.clone();
        edit(&mut *stored);
        stored.version = previous.version + 1;
        stored.updated_at = Utc::now();
        Ok((previous, stored.clone()))
    }

    /// Conditional replace. On `Applied`, also returns the record it replaced.
    pub fn compare_and_set(
        &mut self,
        machine_id: &str,
        expected: MachineStatus,
        mut next: Machine,
    ) -> (CasOutcome, Option<Machine>) {
        let Some(stored) = self.machines.get_mut(machine_id) else {
            return (CasOutcome::Missing, None);
        };
        if stored.status != expected {
            return (CasOutcome::Conflict(stored.clone()), None);
        }

        next.machine_id = stored.machine_id.clone();
        next.version = stored.version + 1;
        let previous = std::mem::replace(stored, next);
        (CasOutcome::Applied(stored.clone()), Some(previous))
    }

    pub fn provision(&mut self, machine: Machine) -> bool {
        use std::collections::hash_map::Entry;

        match self.machines.entry(machine.machine_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(machine);
                true
            }
        }
    }

    /// Put back a record captured before a write that could not be persisted.
    pub fn restore(&mut self, previous: Machine) {
        self.machines.insert(previous.machine_id.clone(), previous);
    }

    pub fn remove(&mut self, machine_id: &str) {
        self.machines.remove(machine_id);
    }
}
