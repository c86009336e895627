//! Builds the collaborators from configuration and hands them to the engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::auth::{HttpTokenVerifier, IdentityVerifier, StaticTokenVerifier};
use crate::cache::{InMemoryStateCache, StateCache};
use crate::config::{AuthConfig, FleetConfig, HardwareConfig, MachineSeed, StoreConfig};
use crate::engine::ReservationEngine;
use crate::error::{EngineError, FleetError};
use crate::hardware::{HardwareController, HttpHardwareController, SimulatedController};
use crate::router::RequestRouter;
use crate::state_machine::{Machine, MachineStateMachine, Transition};
use crate::store::{CasOutcome, InMemoryMachineStore, JsonFileStore, MachineStore};

/// A fully wired service.
pub struct Fleet {
    pub store: Arc<dyn MachineStore>,
    pub router: RequestRouter,
}

impl Fleet {
    pub async fn from_config(config: &FleetConfig) -> Result<Self, FleetError> {
        let store = open_inventory(config).await?;

        let cache: Arc<dyn StateCache> = match config.cache.ttl_secs {
            Some(secs) => Arc::new(InMemoryStateCache::with_ttl(Duration::from_secs(secs))),
            None => Arc::new(InMemoryStateCache::new()),
        };
        let hardware = build_hardware(&config.hardware)?;
        let verifier = build_verifier(&config.auth)?;

        let engine = ReservationEngine::new(
            Arc::clone(&store),
            cache,
            hardware,
            config.engine_settings(),
        );

        Ok(Self {
            store,
            router: RequestRouter::new(engine, verifier),
        })
    }

    pub fn engine(&self) -> &ReservationEngine {
        self.router.engine()
    }
}

/// Open the configured store and provision the seed inventory into it.
pub async fn open_inventory(config: &FleetConfig) -> Result<Arc<dyn MachineStore>, FleetError> {
    let store = open_store(&config.store).await?;
    provision(store.as_ref(), &config.machines).await?;
    Ok(store)
}

async fn open_store(config: &StoreConfig) -> Result<Arc<dyn MachineStore>, FleetError> {
    let store: Arc<dyn MachineStore> = match &config.path {
        Some(path) => {
            info!(path = %path.display(), "using JSON file store");
            Arc::new(JsonFileStore::open(path).await?)
        }
        None => {
            info!("using in-memory store; state is lost on restart");
            Arc::new(InMemoryMachineStore::new())
        }
    };
    Ok(store)
}

async fn provision(store: &dyn MachineStore, seeds: &[MachineSeed]) -> Result<(), FleetError> {
    let mut added = 0;
    for seed in seeds {
        if seed.machine_id.trim().is_empty() || seed.location_id.trim().is_empty() {
            return Err(FleetError::Config(
                "machine seeds need both machine_id and location_id".into(),
            ));
        }
        if store
            .provision(Machine::new(&seed.machine_id, &seed.location_id))
            .await?
        {
            added += 1;
        }
    }
    if added > 0 {
        info!(added, "provisioned machines");
    }
    Ok(())
}

/// Put an `ERROR` or stuck `AWAITING_DROPOFF` machine back into the pool.
///
/// One conditional write expecting the status just read, so the record is
/// never persisted half-recovered. `RUNNING` machines are refused.
pub async fn recover_machine(
    store: &dyn MachineStore,
    machine_id: &str,
) -> Result<Machine, EngineError> {
    let current = store
        .get_machine(machine_id)
        .await?
        .ok_or_else(|| EngineError::MachineNotFound(machine_id.to_string()))?;
    let next = MachineStateMachine::apply(&current, Transition::Recover, Utc::now())?;

    match store.compare_and_set(machine_id, current.status, next).await? {
        CasOutcome::Applied(recovered) => {
            info!(
                machine_id,
                from = %current.status,
                job_id = ?current.current_job_id,
                "machine recovered"
            );
            Ok(recovered)
        }
        CasOutcome::Conflict(stored) => Err(EngineError::Conflict {
            machine_id: stored.machine_id,
            status: stored.status,
        }),
        CasOutcome::Missing => Err(EngineError::MachineNotFound(machine_id.to_string())),
    }
}

fn build_hardware(config: &HardwareConfig) -> Result<Arc<dyn HardwareController>, FleetError> {
    let Some(base_url) = &config.base_url else {
        warn!("no hardware.base_url configured; using simulated controller");
        return Ok(Arc::new(SimulatedController::new()));
    };
    if config.api_key.is_empty() {
        return Err(FleetError::Config(
            "hardware.api_key (or FLEET_HARDWARE_API_KEY) is required with hardware.base_url"
                .into(),
        ));
    }

    Ok(Arc::new(HttpHardwareController::new(
        base_url.as_str(),
        config.api_key.as_str(),
        Duration::from_millis(config.connect_timeout_ms),
        Duration::from_millis(config.timeout_ms),
    )?))
}

fn build_verifier(config: &AuthConfig) -> Result<Arc<dyn IdentityVerifier>, FleetError> {
    if let Some(url) = &config.verifier_url {
        return Ok(Arc::new(HttpTokenVerifier::new(
            url.as_str(),
            Duration::from_millis(config.timeout_ms),
        )?));
    }
    if config.tokens.is_empty() {
        warn!("no auth tokens configured; every request will be refused");
    }
    Ok(Arc::new(StaticTokenVerifier::new(config.tokens.iter().cloned())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{Outcome, Request};
    use crate::state_machine::MachineStatus;

    fn config(toml_str: &str) -> FleetConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[tokio::test]
    async fn wires_seeded_fleet() {
        let fleet = Fleet::from_config(&config(
            r#"
            [auth]
            tokens = ["t1"]

            [[machines]]
            machine_id = "M1"
            location_id = "L1"
            "#,
        ))
        .await
        .unwrap();

        assert_eq!(fleet.store.list_all().await.unwrap().len(), 1);
        let resp = fleet
            .router
            .dispatch(Request::new("GET", "/machine/M1").with_token("t1"))
            .await;
        assert_eq!(resp.outcome, Outcome::Ok);
    }

    #[tokio::test]
    async fn hardware_url_without_key_is_rejected() {
        let result = Fleet::from_config(&config(
            r#"
            [hardware]
            base_url = "http://gateway.local"
            "#,
        ))
        .await;
        assert!(matches!(result, Err(FleetError::Config(_))));
    }

    #[tokio::test]
    async fn blank_seed_is_rejected() {
        let result = Fleet::from_config(&config(
            r#"
            [[machines]]
            machine_id = ""
            location_id = "L1"
            "#,
        ))
        .await;
        assert!(matches!(result, Err(FleetError::Config(_))));
    }

    fn stuck(id: &str, status: MachineStatus) -> Machine {
        let mut m = Machine::new(id, "L1");
        m.status = status;
        if status.holds_job() {
            m.current_job_id = Some("J1".into());
            m.reserved_at = Some(Utc::now());
        }
        m
    }

    #[tokio::test]
    async fn recover_is_one_durable_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.json");
        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store
                .provision(stuck("M1", MachineStatus::AwaitingDropoff))
                .await
                .unwrap();
            store.provision(stuck("M2", MachineStatus::Error)).await.unwrap();

            for id in ["M1", "M2"] {
                let m = recover_machine(&store, id).await.unwrap();
                assert_eq!(m.status, MachineStatus::Available);
                assert_eq!(m.version, 1);
            }
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        for id in ["M1", "M2"] {
            let m = reopened.get_machine(id).await.unwrap().unwrap();
            assert_eq!(m.status, MachineStatus::Available);
            assert!(m.current_job_id.is_none());
            assert!(m.reserved_at.is_none());
            assert!(m.is_consistent());
        }
    }

    #[tokio::test]
    async fn recover_refuses_running_machine() {
        let store = InMemoryMachineStore::with_machines([stuck("M1", MachineStatus::Running)]);
        let err = recover_machine(&store, "M1").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::PreconditionFailed {
                status: MachineStatus::Running,
                ..
            }
        ));
        let m = store.get_machine("M1").await.unwrap().unwrap();
        assert_eq!(m.status, MachineStatus::Running);
        assert_eq!(m.current_job_id.as_deref(), Some("J1"));
    }

    #[tokio::test]
    async fn recover_unknown_machine_is_not_found() {
        let store = InMemoryMachineStore::new();
        assert!(matches!(
            recover_machine(&store, "ghost").await,
            Err(EngineError::MachineNotFound(_))
        ));
    }

    #[tokio::test]
    async fn file_store_keeps_state_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let toml_str = format!(
            r#"
            [store]
            path = "{}"

            [auth]
            tokens = ["t1"]

            [[machines]]
            machine_id = "M1"
            location_id = "L1"
            "#,
            dir.path().join("fleet.json").display()
        );

        {
            let fleet = Fleet::from_config(&config(&toml_str)).await.unwrap();
            fleet.engine().reserve_machine("L1", "J1").await.unwrap();
        }

        // Re-provisioning the seed must not reset the reserved machine.
        let fleet = Fleet::from_config(&config(&toml_str)).await.unwrap();
        let m = fleet.engine().get_machine("M1").await.unwrap();
        assert_eq!(m.current_job_id.as_deref(), Some("J1"));
    }
}
