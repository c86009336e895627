use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::MachineStatus;

/// A single rentable unit at a location.
///
/// The store owns the canonical copy; anything held elsewhere (cache,
/// responses) is a snapshot identified by `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub machine_id: String,
    pub location_id: String,
    pub status: MachineStatus,
    pub current_job_id: Option<String>,
    /// Bumped by the store on every committed write.
    #[serde(default)]
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<DateTime<Utc>>,
}

impl Machine {
    /// A freshly provisioned, available machine.
    pub fn new(machine_id: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            location_id: location_id.into(),
            status: MachineStatus::Available,
            current_job_id: None,
            version: 0,
            updated_at: Utc::now(),
            reserved_at: None,
        }
    }

    /// A job id is present exactly when the status requires one.
    pub fn is_consistent(&self) -> bool {
        self.current_job_id.is_some() == self.status.holds_job()
    }

    /// Whether a reservation on this machine has outlived `max_hold`.
    pub fn reservation_expired(&self, now: DateTime<Utc>, max_hold: chrono::Duration) -> bool {
        self.status == MachineStatus::AwaitingDropoff
            && self
                .reserved_at
                .is_some_and(|reserved_at| now - reserved_at > max_hold)
    }
}
