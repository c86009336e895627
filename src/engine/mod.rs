//! Reservation and lifecycle engine.
//!
//! Every state change is a conditional write against the store
//! ([`MachineStore::compare_and_set`]) expecting the status the decision was
//! based on. Reservations need nothing more: losing a race just moves on to
//! the next candidate. Starts additionally hold a per-machine lock for the
//! whole validate → hardware → commit sequence, so one machine never gets
//! two start commands at once.
//!
//! The cache is refreshed after each commit and is never the only place a
//! write lands.

mod locks;

pub use locks::{MachineLockGuard, MachineLocks};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{Instrument, debug, error, info, instrument, warn};

use crate::cache::StateCache;
use crate::error::EngineError;
use crate::hardware::{HardwareController, HardwareError};
use crate::state_machine::{Machine, MachineStateMachine, MachineStatus, Transition};
use crate::store::{CasOutcome, MachineStore};

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on a single hardware start call. Exceeding it counts as a failure.
    pub hardware_timeout: Duration,
    /// How long a reservation may wait for its start before the sweeper
    /// returns the machine to the pool. `None` keeps reservations forever.
    pub max_hold: Option<chrono::Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            hardware_timeout: Duration::from_secs(10),
            max_hold: None,
        }
    }
}

#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn MachineStore>,
    cache: Arc<dyn StateCache>,
    hardware: Arc<dyn HardwareController>,
    locks: Arc<MachineLocks>,
    settings: EngineSettings,
}

impl ReservationEngine {
    pub fn new(
        store: Arc<dyn MachineStore>,
        cache: Arc<dyn StateCache>,
        hardware: Arc<dyn HardwareController>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            cache,
            hardware,
            locks: Arc::new(MachineLocks::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Hand one available machine at `location_id` to `job_id`.
    ///
    /// Candidates come from the store, never the cache. Each is claimed with
    /// a conditional write expecting `AVAILABLE`; a concurrent winner turns
    /// that into a conflict and the next candidate is tried.
    #[instrument(skip(self))]
    pub async fn reserve_machine(
        &self,
        location_id: &str,
        job_id: &str,
    ) -> Result<Machine, EngineError> {
        require_id("locationId", location_id)?;
        require_id("jobId", job_id)?;

        let candidates = self.store.list_machines_at_location(location_id).await?;
        for candidate in candidates
            .iter()
            .filter(|m| m.status == MachineStatus::Available)
        {
            let reserve = Transition::Reserve {
                job_id: job_id.to_string(),
            };
            match self.commit(candidate, reserve).await {
                Ok(reserved) => {
                    info!(machine_id = %reserved.machine_id, "machine reserved");
                    return Ok(reserved);
                }
                Err(EngineError::Conflict { machine_id, status }) => {
                    debug!(%machine_id, %status, "lost reservation race, trying next candidate");
                }
                Err(EngineError::MachineNotFound(machine_id)) => {
                    debug!(%machine_id, "candidate vanished, trying next candidate");
                }
                Err(e) => return Err(e),
            }
        }

        Err(EngineError::NoneAvailable {
            location_id: location_id.to_string(),
        })
    }

    /// Current state of a machine, cache first.
    ///
    /// A cache error is treated as a miss. A store hit repopulates the cache.
    #[instrument(skip(self))]
    pub async fn get_machine(&self, machine_id: &str) -> Result<Machine, EngineError> {
        require_id("machineId", machine_id)?;

        match self.cache.get(machine_id).await {
            Ok(Some(machine)) => return Ok(machine),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "cache read failed, falling back to store"),
        }

        let machine = self
            .store
            .get_machine(machine_id)
            .await?
            .ok_or_else(|| EngineError::MachineNotFound(machine_id.to_string()))?;
        self.refresh_cache(&machine).await;
        Ok(machine)
    }

    /// Start the cycle of a reserved machine.
    ///
    /// The work runs on its own task: if the caller gives up (timeout,
    /// disconnect) the machine still ends up `RUNNING` or `ERROR`.
    #[instrument(skip(self))]
    pub async fn start_machine(&self, machine_id: &str) -> Result<Machine, EngineError> {
        require_id("machineId", machine_id)?;

        let engine = self.clone();
        let machine_id = machine_id.to_string();
        let task = tokio::spawn(
            async move { engine.run_start(&machine_id).await }.instrument(tracing::Span::current()),
        );

        task.await
            .map_err(|e| EngineError::Internal(format!("start task did not complete: {e}")))?
    }

    async fn run_start(&self, machine_id: &str) -> Result<Machine, EngineError> {
        // Unknown ids never get a lock entry.
        self.load(machine_id).await?;
        let _guard = self.locks.acquire(machine_id).await;

        // Re-read under the lock so only committed reservations are seen.
        let machine = self.load(machine_id).await?;
        if !Transition::Start.can_apply_from(machine.status) {
            return Err(EngineError::PreconditionFailed {
                machine_id: machine.machine_id,
                status: machine.status,
                action: Transition::Start.name(),
            });
        }

        match self.call_hardware(machine_id).await {
            Ok(()) => {
                let running = self.commit(&machine, Transition::Start).await.inspect_err(|e| {
                    error!(error = %e, "hardware started but RUNNING could not be recorded");
                })?;
                info!(job_id = ?running.current_job_id, "machine running");
                Ok(running)
            }
            Err(source) => {
                warn!(error = %source, "hardware start failed, marking machine ERROR");
                self.commit(&machine, Transition::Fail).await.inspect_err(|e| {
                    error!(error = %e, "hardware failed and ERROR could not be recorded");
                })?;
                Err(EngineError::HardwareFailure {
                    machine_id: machine_id.to_string(),
                    source,
                })
            }
        }
    }

    async fn load(&self, machine_id: &str) -> Result<Machine, EngineError> {
        self.store
            .get_machine(machine_id)
            .await?
            .ok_or_else(|| EngineError::MachineNotFound(machine_id.to_string()))
    }

    async fn call_hardware(&self, machine_id: &str) -> Result<(), HardwareError> {
        let limit = self.settings.hardware_timeout;
        match tokio::time::timeout(limit, self.hardware.start_cycle(machine_id)).await {
            Ok(result) => result,
            Err(_) => Err(HardwareError::timed_out(limit)),
        }
    }

    /// Return reservations older than the configured hold to the pool.
    ///
    /// A no-op unless `max_hold` is set. Returns the released machines.
    #[instrument(skip(self))]
    pub async fn release_expired_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Machine>, EngineError> {
        let Some(max_hold) = self.settings.max_hold else {
            return Ok(Vec::new());
        };

        let mut released = Vec::new();
        for stale in self
            .store
            .list_all()
            .await?
            .into_iter()
            .filter(|m| m.reservation_expired(now, max_hold))
        {
            let _guard = self.locks.acquire(&stale.machine_id).await;
            let Some(current) = self.store.get_machine(&stale.machine_id).await? else {
                continue;
            };
            if !current.reservation_expired(now, max_hold) {
                continue;
            }

            match self.commit(&current, Transition::Release).await {
                Ok(machine) => {
                    info!(
                        machine_id = %machine.machine_id,
                        job_id = ?current.current_job_id,
                        "released expired reservation"
                    );
                    released.push(machine);
                }
                Err(EngineError::Conflict { .. } | EngineError::MachineNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(released)
    }

    /// Apply `transition` to `current` and commit it if the stored status
    /// has not moved. Refreshes the cache on success.
    async fn commit(&self, current: &Machine, transition: Transition) -> Result<Machine, EngineError> {
        let expected = current.status;
        let next = MachineStateMachine::apply(current, transition, Utc::now())?;

        match self
            .store
            .compare_and_set(&current.machine_id, expected, next)
            .await?
        {
            CasOutcome::Applied(committed) => {
                self.refresh_cache(&committed).await;
                Ok(committed)
            }
            CasOutcome::Conflict(stored) => Err(EngineError::Conflict {
                machine_id: stored.machine_id,
                status: stored.status,
            }),
            CasOutcome::Missing => Err(EngineError::MachineNotFound(current.machine_id.clone())),
        }
    }

    /// Best-effort mirror update. A failed put evicts the entry instead so
    /// readers fall through to the store.
    async fn refresh_cache(&self, machine: &Machine) {
        if let Err(e) = self.cache.put(&machine.machine_id, machine.clone()).await {
            warn!(machine_id = %machine.machine_id, error = %e, "cache put failed, evicting");
            if let Err(e) = self.cache.invalidate(&machine.machine_id).await {
                warn!(machine_id = %machine.machine_id, error = %e, "cache eviction failed");
            }
        }
    }
}

fn require_id(field: &str, value: &str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}
