//! Authoritative machine records.
//!
//! The [`MachineStore`] trait is the single writer of record. Every engine
//! mutation goes through [`MachineStore::compare_and_set`], which commits a
//! new record only if the machine is still in the status the caller read.

mod file;
mod memory;
mod table;

pub use file::JsonFileStore;
pub use memory::InMemoryMachineStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::state_machine::{Machine, MachineStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("machine not found: {0}")]
    NotFound(String),

    #[error("store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store snapshot is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write was committed; carries the stored record.
    Applied(Machine),
    /// The machine was no longer in the expected status; carries what is stored now.
    Conflict(Machine),
    /// No machine with that id exists.
    Missing,
}

#[async_trait]
pub trait MachineStore: Send + Sync {
    /// All machines at a location, ordered by machine id.
    async fn list_machines_at_location(&self, location_id: &str)
    -> Result<Vec<Machine>, StoreError>;

    async fn get_machine(&self, machine_id: &str) -> Result<Option<Machine>, StoreError>;

    /// Unconditionally overwrite a machine's status.
    ///
    /// Intended for operator tooling. The caller is responsible for keeping
    /// the job id consistent with the new status.
    async fn update_machine_status(
        &self,
        machine_id: &str,
        status: MachineStatus,
    ) -> Result<Machine, StoreError>;

    /// Unconditionally overwrite a machine's job id. See [`Self::update_machine_status`].
    async fn update_machine_job_id(
        &self,
        machine_id: &str,
        job_id: Option<&str>,
    ) -> Result<Machine, StoreError>;

    /// Replace the record for `machine_id` with `next` if, and only if, its
    /// stored status is still `expected`.
    ///
    /// Check and write happen atomically with respect to every other write
    /// on the same store. The committed record gets `version` bumped past
    /// the one it replaced.
    async fn compare_and_set(
        &self,
        machine_id: &str,
        expected: MachineStatus,
        next: Machine,
    ) -> Result<CasOutcome, StoreError>;

    /// Insert a machine unless one with the same id already exists.
    /// Returns whether it was inserted.
    async fn provision(&self, machine: Machine) -> Result<bool, StoreError>;

    /// Every machine, ordered by location then id.
    async fn list_all(&self) -> Result<Vec<Machine>, StoreError>;
}
