use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::machine::Machine;

/// The four states of a rentable machine.
///
/// A machine flows through: AVAILABLE → AWAITING_DROPOFF → RUNNING, or
/// AWAITING_DROPOFF → ERROR when the hardware refuses to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStatus {
    Available,
    AwaitingDropoff,
    Running,
    Error,
}

impl MachineStatus {
    /// Whether a machine in this status must carry a job id.
    pub fn holds_job(self) -> bool {
        matches!(self, MachineStatus::AwaitingDropoff | MachineStatus::Running)
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineStatus::Available => write!(f, "AVAILABLE"),
            MachineStatus::AwaitingDropoff => write!(f, "AWAITING_DROPOFF"),
            MachineStatus::Running => write!(f, "RUNNING"),
            MachineStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// A requested change to a machine's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Hand an available machine to a job.
    Reserve { job_id: String },
    /// The hardware accepted the start command.
    Start,
    /// The hardware rejected (or never answered) the start command.
    Fail,
    /// Drop a reservation that was never started.
    Release,
    /// Operator recovery of a failed or stuck machine back into the pool.
    Recover,
}

impl Transition {
    /// Whether this transition may be applied to a machine in `status`.
    pub fn can_apply_from(&self, status: MachineStatus) -> bool {
        match self {
            Transition::Reserve { .. } => status == MachineStatus::Available,
            Transition::Start | Transition::Fail | Transition::Release => {
                status == MachineStatus::AwaitingDropoff
            }
            Transition::Recover => {
                matches!(status, MachineStatus::Error | MachineStatus::AwaitingDropoff)
            }
        }
    }

    /// The status a machine lands in once the transition is applied.
    pub fn target_status(&self) -> MachineStatus {
        match self {
            Transition::Reserve { .. } => MachineStatus::AwaitingDropoff,
            Transition::Start => MachineStatus::Running,
            Transition::Fail => MachineStatus::Error,
            Transition::Release | Transition::Recover => MachineStatus::Available,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Transition::Reserve { .. } => "reserve",
            Transition::Start => "start",
            Transition::Fail => "fail",
            Transition::Release => "release",
            Transition::Recover => "recover",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("cannot {transition} machine {machine_id} while it is {status}")]
    Illegal {
        machine_id: String,
        status: MachineStatus,
        transition: &'static str,
    },

    #[error("job id must not be empty")]
    EmptyJobId,
}

/// Computes the next record for a machine.
///
/// Pure: nothing is persisted here. The store stamps the version when the
/// returned record is committed.
pub struct MachineStateMachine;

impl MachineStateMachine {
    /// Apply `transition` to `machine`, returning the record to commit.
    ///
    /// - `Reserve` attaches the job id and stamps `reserved_at`.
    /// - `Start` keeps the job id; the cycle now runs for that job.
    /// - `Fail`, `Release` and `Recover` clear the job id, since neither
    ///   `ERROR` nor `AVAILABLE` may hold one.
    pub fn apply(
        machine: &Machine,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<Machine, TransitionError> {
        if !transition.can_apply_from(machine.status) {
            return Err(TransitionError::Illegal {
                machine_id: machine.machine_id.clone(),
                status: machine.status,
                transition: transition.name(),
            });
        }

        let mut next = machine.clone();
        next.status = transition.target_status();
        next.updated_at = now;

        match transition {
            Transition::Reserve { job_id } => {
                if job_id.trim().is_empty() {
                    return Err(TransitionError::EmptyJobId);
                }
                next.current_job_id = Some(job_id);
                next.reserved_at = Some(now);
            }
            Transition::Start => {}
            Transition::Fail | Transition::Release | Transition::Recover => {
                next.current_job_id = None;
                next.reserved_at = None;
            }
        }

        debug_assert!(next.is_consistent());
        Ok(next)
    }
}
