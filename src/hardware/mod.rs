//! Remote control of the physical units.

mod client;
mod error;

pub use client::HttpHardwareController;
pub use error::HardwareError;

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

#[async_trait]
pub trait HardwareController: Send + Sync {
    /// Ask the unit to begin its cycle. `Ok` means the unit confirmed.
    async fn start_cycle(&self, machine_id: &str) -> Result<(), HardwareError>;
}

/// Stand-in controller for local runs and tests.
///
/// Every start succeeds after `latency` unless the machine was marked
/// offline with [`SimulatedController::take_offline`].
#[derive(Debug, Default)]
pub struct SimulatedController {
    offline: RwLock<HashSet<String>>,
    latency: Duration,
    calls: AtomicUsize,
}

impl SimulatedController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    pub async fn take_offline(&self, machine_id: &str) {
        self.offline.write().await.insert(machine_id.to_string());
    }

    pub async fn bring_online(&self, machine_id: &str) {
        self.offline.write().await.remove(machine_id);
    }

    /// Number of start commands received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HardwareController for SimulatedController {
    async fn start_cycle(&self, machine_id: &str) -> Result<(), HardwareError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.offline.read().await.contains(machine_id) {
            return Err(HardwareError::Offline(machine_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_counts_calls_and_honours_offline() {
        let ctl = SimulatedController::new();
        assert!(ctl.start_cycle("M1").await.is_ok());

        ctl.take_offline("M1").await;
        assert!(matches!(
            ctl.start_cycle("M1").await,
            Err(HardwareError::Offline(id)) if id == "M1"
        ));

        ctl.bring_online("M1").await;
        assert!(ctl.start_cycle("M1").await.is_ok());
        assert_eq!(ctl.calls(), 3);
    }
}
