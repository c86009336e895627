use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use laundry_fleet::app::{Fleet, open_inventory, recover_machine};
use laundry_fleet::auth::StaticTokenVerifier;
use laundry_fleet::cache::InMemoryStateCache;
use laundry_fleet::cli::{Cli, Command};
use laundry_fleet::config::FleetConfig;
use laundry_fleet::hardware::SimulatedController;
use laundry_fleet::server;
use laundry_fleet::store::{InMemoryMachineStore, MachineStore};
use laundry_fleet::ui::{FleetDisplay, Spinner};
use laundry_fleet::{
    EngineSettings, Machine, MachineStatus, Request, RequestRouter, ReservationEngine,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, matches!(cli.command, Command::Serve { .. }));

    match cli.command {
        Command::Serve { bind } => {
            let config = FleetConfig::load_from(&cli.config)?;
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            let fleet = Fleet::from_config(&config).await?;

            let listener = TcpListener::bind(&bind)
                .await
                .with_context(|| format!("failed to bind {bind}"))?;
            let sweep_every = Duration::from_secs(config.reservation.sweep_interval_secs.max(1));
            server::serve(listener, fleet.router, sweep_every).await?;
        }
        Command::Status { location } => {
            let config = FleetConfig::load_from(&cli.config)?;
            let store = open_inventory(&config).await?;
            let machines = match &location {
                Some(location_id) => store.list_machines_at_location(location_id).await?,
                None => store.list_all().await?,
            };
            FleetDisplay::new().print_machines(&machines);
        }
        Command::Reset { machine_id } => {
            let config = FleetConfig::load_from(&cli.config)?;
            if config.store.path.is_none() {
                bail!(
                    "reset needs a durable store; set store.path in {}",
                    cli.config.display()
                );
            }
            let store = open_inventory(&config).await?;
            let machine = recover_machine(store.as_ref(), &machine_id)
                .await
                .with_context(|| format!("failed to reset {machine_id}"))?;
            FleetDisplay::new().print_machines(&[machine]);
        }
        Command::Demo => run_demo().await?,
    }

    Ok(())
}

fn init_tracing(verbose: bool, serving: bool) {
    let default_level = if verbose {
        "debug"
    } else if serving {
        "info"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Walks a small in-memory fleet through every outcome of the router.
async fn run_demo() -> Result<()> {
    const TOKEN: &str = "demo-token";

    let mut busy = Machine::new("M2", "L1");
    busy.status = MachineStatus::Running;
    busy.current_job_id = Some("J0".into());

    let store = Arc::new(InMemoryMachineStore::with_machines([
        Machine::new("M1", "L1"),
        busy,
        Machine::new("M3", "L1"),
    ]));
    let hardware = Arc::new(SimulatedController::with_latency(Duration::from_millis(400)));
    hardware.take_offline("M3").await;

    let engine = ReservationEngine::new(
        store.clone(),
        Arc::new(InMemoryStateCache::new()),
        hardware,
        EngineSettings::default(),
    );
    let router = RequestRouter::new(engine, Arc::new(StaticTokenVerifier::new([TOKEN])));
    let display = FleetDisplay::new();

    println!("Initial fleet:");
    display.print_machines(&store.list_all().await?);
    println!();

    let reserve = |job_id: &str| {
        Request::new("POST", "/machine/request")
            .with_token(TOKEN)
            .with_body(json!({ "locationId": "L1", "jobId": job_id }))
    };
    let steps = [
        ("reserve at L1 for J1", reserve("J1")),
        ("reserve at L1 for J2", reserve("J2")),
        ("reserve at L1 for J3", reserve("J3")),
        (
            "start M1",
            Request::new("POST", "/machine/M1/start").with_token(TOKEN),
        ),
        (
            "start M3 (hardware offline)",
            Request::new("POST", "/machine/M3/start").with_token(TOKEN),
        ),
        (
            "start M2 (already running)",
            Request::new("POST", "/machine/M2/start").with_token(TOKEN),
        ),
        (
            "get M3",
            Request::new("GET", "/machine/M3").with_token(TOKEN),
        ),
        (
            "get M1 with a bad token",
            Request::new("GET", "/machine/M1").with_token("nope"),
        ),
    ];

    for (label, request) in steps {
        let spinner = Spinner::start(label);
        let response = router.dispatch(request).await;
        spinner.finish();
        display.print_response(label, &response);
    }

    println!();
    println!("Final fleet:");
    display.print_machines(&store.list_all().await?);
    Ok(())
}
