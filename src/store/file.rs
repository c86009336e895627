//! Durable [`MachineStore`] backed by a JSON snapshot file.
//!
//! Reads are served from memory. Every committed write rewrites the snapshot
//! (temp file + rename) while the table lock is still held, so the file never
//! lags behind what callers have been told. If the snapshot cannot be written
//! the in-memory change is rolled back and the error is returned.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error};

use super::table::{MachineTable, Snapshot};
use super::{CasOutcome, MachineStore, StoreError};
use crate::state_machine::{Machine, MachineStatus};

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    table: RwLock<MachineTable>,
}

impl JsonFileStore {
    /// Open the snapshot at `path`, starting empty if it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let table = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let snapshot: Snapshot = serde_json::from_str(&contents)?;
                debug!(path = %path.display(), machines = snapshot.machines.len(), "loaded machine snapshot");
                MachineTable::from_snapshot(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => MachineTable::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            table: RwLock::new(table),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, table: &MachineTable) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&table.to_snapshot())?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Persist after a write, restoring `previous` if that fails.
    async fn commit(
        &self,
        table: &mut MachineTable,
        previous: Machine,
    ) -> Result<(), StoreError> {
        if let Err(e) = self.persist(table).await {
            error!(path = %self.path.display(), error = %e, "failed to persist machine snapshot");
            table.restore(previous);
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl MachineStore for JsonFileStore {
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
        let (previous, committed) = table.update_with(machine_id, |m| m.status = status)?;
        self.commit(&mut table, previous).await?;
        Ok(committed)
    }

    async fn update_machine_job_id(
        &self,
        machine_id: &str,
        job_id: Option<&str>,
    ) -> Result<Machine, StoreError> {
        let mut table = self.table.write().await;
        let (previous, committed) =
            table.update_with(machine_id, |m| m.current_job_id = job_id.map(str::to_string))?;
        self.commit(&mut table, previous).await?;
        Ok(committed)
    }

    async fn compare_and_set(
        &self,
        machine_id: &str,
        expected: MachineStatus,
        next: Machine,
    ) -> Result<CasOutcome, StoreError> {
        let mut table = self.table.write().await;
        let (outcome, previous) = table.compare_and_set(machine_id, expected, next);
        if let Some(previous) = previous {
            self.commit(&mut table, previous).await?;
        }
        Ok(outcome)
    }

    async fn provision(&self, machine: Machine) -> Result<bool, StoreError> {
        let mut table = self.table.write().await;
        let machine_id = machine.machine_id.clone();
        if !table.provision(machine) {
            return Ok(false);
        }
        if let Err(e) = self.persist(&table).await {
            table.remove(&machine_id);
            return Err(e);
        }
        Ok(true)
    }

    async fn list_all(&self) -> Result<Vec<Machine>, StoreError> {
        Ok(self.table.read().await.all())
    }
}
