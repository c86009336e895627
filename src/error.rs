use thiserror::Error;

use crate::auth::AuthError;
use crate::hardware::HardwareError;
use crate::state_machine::{MachineStatus, TransitionError};
use crate::store::StoreError;

/// Failures of the reservation and lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("machine not found: {0}")]
    MachineNotFound(String),

    #[error("no available machine at location {location_id}")]
    NoneAvailable { location_id: String },

    #[error("cannot {action} machine {machine_id} while it is {status}")]
    PreconditionFailed {
        machine_id: String,
        status: MachineStatus,
        action: &'static str,
    },

    #[error("hardware failed to start machine {machine_id}: {source}")]
    HardwareFailure {
        machine_id: String,
        #[source]
        source: HardwareError,
    },

    /// The record changed between read and conditional write.
    #[error("machine {machine_id} changed concurrently (now {status})")]
    Conflict {
        machine_id: String,
        status: MachineStatus,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TransitionError> for EngineError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Illegal {
                machine_id,
                status,
                transition,
            } => EngineError::PreconditionFailed {
                machine_id,
                status,
                action: transition,
            },
            TransitionError::EmptyJobId => {
                EngineError::InvalidInput("job id must not be empty".into())
            }
        }
    }
}

/// Errors raised while wiring the service together at startup.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("config error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("hardware client error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("identity verifier error: {0}")]
    Auth(#[from] AuthError),
}
