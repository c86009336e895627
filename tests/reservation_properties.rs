//! End-to-end checks of the reservation workflow through the router.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use laundry_fleet::auth::StaticTokenVerifier;
use laundry_fleet::cache::{InMemoryStateCache, StateCache};
use laundry_fleet::hardware::{HardwareController, HardwareError, SimulatedController};
use laundry_fleet::store::{InMemoryMachineStore, MachineStore};
use laundry_fleet::{
    EngineSettings, Machine, MachineStatus, Outcome, Request, RequestRouter, ReservationEngine,
};

const TOKEN: &str = "secret";

struct Harness {
    store: Arc<InMemoryMachineStore>,
    cache: Arc<InMemoryStateCache>,
    router: RequestRouter,
}

fn harness(machines: Vec<Machine>, hardware: Arc<dyn HardwareController>) -> Harness {
    let store = Arc::new(InMemoryMachineStore::with_machines(machines));
    let cache = Arc::new(InMemoryStateCache::new());
    let engine = ReservationEngine::new(
        store.clone(),
        cache.clone(),
        hardware,
        EngineSettings::default(),
    );
    let router = RequestRouter::new(engine, Arc::new(StaticTokenVerifier::new([TOKEN])));
    Harness {
        store,
        cache,
        router,
    }
}

fn machine(id: &str, location: &str, status: MachineStatus) -> Machine {
    let mut m = Machine::new(id, location);
    m.status = status;
    if status.holds_job() {
        m.current_job_id = Some(format!("job-for-{id}"));
    }
    m
}

fn reserve(location: &str, job: &str) -> Request {
    Request::new("POST", "/machine/request")
        .with_token(TOKEN)
        .with_body(json!({ "locationId": location, "jobId": job }))
}

fn start(machine_id: &str) -> Request {
    Request::new("POST", format!("/machine/{machine_id}/start")).with_token(TOKEN)
}

fn get(machine_id: &str) -> Request {
    Request::new("GET", format!("/machine/{machine_id}")).with_token(TOKEN)
}

struct RefusingController;

#[async_trait]
impl HardwareController for RefusingController {
    async fn start_cycle(&self, _machine_id: &str) -> Result<(), HardwareError> {
        Err(HardwareError::Rejected {
            status: 503,
            message: "door open".into(),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_hand_out_the_last_machine_once() {
    let h = harness(
        vec![
            machine("M1", "L1", MachineStatus::Available),
            machine("M2", "L1", MachineStatus::Running),
        ],
        Arc::new(SimulatedController::new()),
    );

    let mut handles = Vec::new();
    for i in 0..32 {
        let router = h.router.clone();
        handles.push(tokio::spawn(async move {
            router.dispatch(reserve("L1", &format!("J{i}"))).await
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        let resp = handle.await.unwrap();
        match resp.outcome {
            Outcome::Ok => winners.push(resp.body["currentJobId"].as_str().unwrap().to_string()),
            Outcome::NotFound => {}
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(winners.len(), 1);
    let m1 = h.store.get_machine("M1").await.unwrap().unwrap();
    assert_eq!(m1.status, MachineStatus::AwaitingDropoff);
    assert_eq!(m1.current_job_id.as_deref(), Some(winners[0].as_str()));
    assert_eq!(m1.version, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reservations_never_share_a_machine() {
    let machines = (0..8)
        .map(|i| machine(&format!("M{i}"), "L1", MachineStatus::Available))
        .collect();
    let h = harness(machines, Arc::new(SimulatedController::new()));

    let mut handles = Vec::new();
    for i in 0..20 {
        let router = h.router.clone();
        handles.push(tokio::spawn(async move {
            router.dispatch(reserve("L1", &format!("J{i}"))).await
        }));
    }

    let mut assigned = std::collections::HashSet::new();
    let mut not_found = 0;
    for handle in handles {
        let resp = handle.await.unwrap();
        match resp.outcome {
            Outcome::Ok => {
                let id = resp.body["machineId"].as_str().unwrap().to_string();
                assert!(assigned.insert(id), "machine handed out twice");
            }
            Outcome::NotFound => not_found += 1,
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(assigned.len(), 8);
    assert_eq!(not_found, 12);
}

#[tokio::test]
async fn reservation_is_visible_from_cache_and_store() {
    let h = harness(
        vec![machine("M1", "L1", MachineStatus::Available)],
        Arc::new(SimulatedController::new()),
    );

    let resp = h.router.dispatch(reserve("L1", "J1")).await;
    assert_eq!(resp.outcome, Outcome::Ok);

    // Served from the cache.
    let resp = h.router.dispatch(get("M1")).await;
    assert_eq!(resp.body["status"], "AWAITING_DROPOFF");
    assert_eq!(resp.body["currentJobId"], "J1");

    // Served from the store after the cache is emptied.
    h.cache.invalidate("M1").await.unwrap();
    let resp = h.router.dispatch(get("M1")).await;
    assert_eq!(resp.body["status"], "AWAITING_DROPOFF");
    assert_eq!(resp.body["currentJobId"], "J1");
}

#[tokio::test]
async fn start_outside_awaiting_dropoff_is_bad_request() {
    let hardware = Arc::new(SimulatedController::new());
    let h = harness(
        vec![
            machine("M1", "L1", MachineStatus::Available),
            machine("M2", "L1", MachineStatus::Running),
            machine("M3", "L1", MachineStatus::Error),
        ],
        hardware.clone(),
    );

    for id in ["M1", "M2", "M3"] {
        let before = h.store.get_machine(id).await.unwrap().unwrap();
        let resp = h.router.dispatch(start(id)).await;
        assert_eq!(resp.outcome, Outcome::BadRequest, "machine {id}");
        assert_eq!(h.store.get_machine(id).await.unwrap().unwrap(), before);
    }
    assert_eq!(hardware.calls(), 0);
}

#[tokio::test]
async fn failed_start_leaves_machine_in_error() {
    let h = harness(
        vec![machine("M1", "L1", MachineStatus::Available)],
        Arc::new(RefusingController),
    );
    h.router.dispatch(reserve("L1", "J1")).await;

    let resp = h.router.dispatch(start("M1")).await;
    assert_eq!(resp.outcome, Outcome::HardwareError);
    assert!(
        resp.body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("door open")
    );

    let stored = h.store.get_machine("M1").await.unwrap().unwrap();
    assert_eq!(stored.status, MachineStatus::Error);
    let cached = h.cache.get("M1").await.unwrap().unwrap();
    assert_eq!(cached.status, MachineStatus::Error);

    // Terminal for this attempt: a second start is a precondition failure.
    let resp = h.router.dispatch(start("M1")).await;
    assert_eq!(resp.outcome, Outcome::BadRequest);
}

#[tokio::test]
async fn successful_start_runs_machine() {
    let h = harness(
        vec![machine("M1", "L1", MachineStatus::Available)],
        Arc::new(SimulatedController::new()),
    );
    h.router.dispatch(reserve("L1", "J1")).await;

    let resp = h.router.dispatch(start("M1")).await;
    assert_eq!(resp.outcome, Outcome::Ok);
    assert_eq!(resp.body["status"], "RUNNING");
    assert_eq!(resp.body["currentJobId"], "J1");
}

#[tokio::test]
async fn invalid_token_mutates_nothing() {
    let hardware = Arc::new(SimulatedController::new());
    let h = harness(
        vec![
            machine("M1", "L1", MachineStatus::Available),
            machine("M2", "L1", MachineStatus::AwaitingDropoff),
        ],
        hardware.clone(),
    );
    let before = h.store.list_all().await.unwrap();

    let requests = [
        reserve("L1", "J1").with_token("forged"),
        start("M2").with_token("forged"),
        get("M1").with_token("forged"),
        Request::new("POST", "/machine/request").with_body(json!({ "locationId": "L1", "jobId": "J1" })),
    ];
    for request in requests {
        let resp = h.router.dispatch(request).await;
        assert_eq!(resp.outcome, Outcome::Unauthorized);
        assert_eq!(resp.status_code, 401);
    }

    assert_eq!(h.store.list_all().await.unwrap(), before);
    assert!(h.cache.is_empty().await);
    assert_eq!(hardware.calls(), 0);
}

#[tokio::test]
async fn scenario_second_reservation_finds_nothing() {
    let h = harness(
        vec![
            machine("M1", "L1", MachineStatus::Available),
            machine("M2", "L1", MachineStatus::Running),
        ],
        Arc::new(SimulatedController::new()),
    );

    let first = h.router.dispatch(reserve("L1", "J1")).await;
    assert_eq!(first.outcome, Outcome::Ok);
    assert_eq!(first.body["machineId"], "M1");
    assert_eq!(first.body["status"], "AWAITING_DROPOFF");
    assert_eq!(first.body["currentJobId"], "J1");

    let second = h.router.dispatch(reserve("L1", "J2")).await;
    assert_eq!(second.outcome, Outcome::NotFound);
}

#[tokio::test]
async fn scenario_start_available_machine() {
    let h = harness(
        vec![machine("M1", "L1", MachineStatus::Available)],
        Arc::new(SimulatedController::new()),
    );
    let resp = h.router.dispatch(start("M1")).await;
    assert_eq!(resp.outcome, Outcome::BadRequest);

    let m1 = h.store.get_machine("M1").await.unwrap().unwrap();
    assert_eq!(m1.status, MachineStatus::Available);
    assert_eq!(m1.version, 0);
}

#[tokio::test]
async fn scenario_unknown_machine_with_cold_cache() {
    let h = harness(vec![], Arc::new(SimulatedController::new()));
    let resp = h.router.dispatch(get("unknown-id")).await;
    assert_eq!(resp.outcome, Outcome::NotFound);
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn reservation_at_other_location_is_untouched() {
    let h = harness(
        vec![
            machine("M1", "L1", MachineStatus::Available),
            machine("M9", "L2", MachineStatus::Available),
        ],
        Arc::new(SimulatedController::new()),
    );

    let resp = h.router.dispatch(reserve("L2", "J1")).await;
    assert_eq!(resp.body["machineId"], "M9");
    let m1 = h.store.get_machine("M1").await.unwrap().unwrap();
    assert_eq!(m1.status, MachineStatus::Available);
}
