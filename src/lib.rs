//! Shared laundry machine reservations.
//!
//! A client reserves an available machine at a location for a job, then
//! starts its cycle remotely. [`engine::ReservationEngine`] owns the state
//! machine and the store/cache consistency rules; everything around it
//! (identity, hardware, storage, HTTP) is an injected collaborator.

pub mod app;
pub mod auth;
pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod router;
pub mod server;
pub mod state_machine;
pub mod store;
pub mod ui;

pub use engine::{EngineSettings, ReservationEngine};
pub use error::{EngineError, FleetError};
pub use router::{Outcome, Request, RequestRouter, Response};
pub use state_machine::{Machine, MachineStatus};
