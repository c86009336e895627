//! In-memory implementation of [`MachineStore`].
//!
//! All records live in a `HashMap` behind a `RwLock` and are lost on restart.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::table::MachineTable;
use super::{CasOutcome, MachineStore, StoreError};
use crate::state_machine::{Machine, MachineStatus};

#[derive(Debug, Default)]
pub struct InMemoryMachineStore {
    table: RwLock<MachineTable>,
}

impl InMemoryMachineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `machines`.
    pub fn with_machines(machines: impl IntoIterator<Item = Machine>) -> Self {
        let mut table = MachineTable::default();
        for machine in machines {
            table.provision(machine);
        }
        Self {
            table: RwLock::new(table),
        }
    }
}

#[async_trait]
impl MachineStore for InMemoryMachineStore {
    async fn list_machines_at_location(
        &self,
        location_id: &str,
    ) -> Result<Vec<Machine>, StoreError> {
        Ok(self.table.read().await.at_location(location_id))
    }

    async fn get_machine(&self, machine_id: &str) -> Result<Option<Machine>, StoreError> {
        Ok(self.table.read().await.get(machine_id))
    }

    async fn update_machine_status(
        &self,
        machine_id: &str,
        status: MachineStatus,
    ) -> Result<Machine, StoreError> {
        let mut table = self.table.write().await;
        let (_, committed) = table.update_with(machine_id, |m| m.status = status)?;
        Ok(committed)
    }

    async fn update_machine_job_id(
        &self,
        machine_id: &str,
        job_id: Option<&str>,
    ) -> Result<Machine, StoreError> {
        let mut table = self.table.write().await;
        let (_, committed) =
            table.update_with(machine_id, |m| m.current_job_id = job_id.map(str::to_string))?;
        Ok(committed)
    }

    async fn compare_and_set(
        &self,
        machine_id: &str,
        expected: MachineStatus,
        next: Machine,
    ) -> Result<CasOutcome, StoreError> {
        let mut table = self.table.write().await;
        let (outcome, _) = table.compare_and_set(machine_id, expected, next);
        Ok(outcome)
    }

    async fn provision(&self, machine: Machine) -> Result<bool, StoreError> {
        Ok(self.table.write().await.provision(machine))
    }

    async fn list_all(&self) -> Result<Vec<Machine>, StoreError> {
        Ok(self.table.read().await.all())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn reserved(mut m: Machine, job_id: &str) -> Machine {
        m.status = MachineStatus::AwaitingDropoff;
        m.current_job_id = Some(job_id.to_string());
        m
    }

    #[tokio::test]
    async fn get_and_list() {
        let store = InMemoryMachineStore::with_machines([
            Machine::new("M1", "L1"),
            Machine::new("M2", "L2"),
        ]);

        assert!(store.get_machine("M1").await.unwrap().is_some());
        assert!(store.get_machine("nope").await.unwrap().is_none());
        assert_eq!(store.list_machines_at_location("L2").await.unwrap().len(), 1);
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unconditional_updates_write_fields() {
        let store = InMemoryMachineStore::with_machines([Machine::new("M1", "L1")]);

        store
            .update_machine_status("M1", MachineStatus::AwaitingDropoff)
            .await
            .unwrap();
        let m = store.update_machine_job_id("M1", Some("J1")).await.unwrap();

        assert_eq!(m.status, MachineStatus::AwaitingDropoff);
        assert_eq!(m.current_job_id.as_deref(), Some("J1"));
        assert_eq!(m.version, 2);
    }

    #[tokio::test]
    async fn unconditional_update_on_missing_machine() {
        let store = InMemoryMachineStore::new();
        let err = store
            .update_machine_status("M1", MachineStatus::Error)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_cas_has_single_winner() {
        let store = Arc::new(InMemoryMachineStore::with_machines([Machine::new("M1", "L1")]));

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let current = store.get_machine("M1").await.unwrap().unwrap();
                store
                    .compare_and_set(
                        "M1",
                        MachineStatus::Available,
                        reserved(current, &format!("J{i}")),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), CasOutcome::Applied(_)) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }
}
