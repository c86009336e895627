//! Read-accelerating mirror of machine records.
//!
//! The cache is never written before the store and never consulted for a
//! write decision. Losing every entry at any time is harmless.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::state_machine::Machine;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait StateCache: Send + Sync {
    async fn get(&self, machine_id: &str) -> Result<Option<Machine>, CacheError>;

    /// Upsert a copy of `machine`.
    ///
    /// Implementations must not replace an entry carrying a higher
    /// `version`, so a slow writer cannot roll the mirror back.
    async fn put(&self, machine_id: &str, machine: Machine) -> Result<(), CacheError>;

    async fn invalidate(&self, machine_id: &str) -> Result<(), CacheError>;
}

/// Process-local cache with an optional time-to-live.
#[derive(Debug, Default)]
pub struct InMemoryStateCache {
    entries: RwLock<HashMap<String, (Machine, Instant)>>,
    ttl: Option<Duration>,
}

impl InMemoryStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries older than `ttl` read as misses.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: Some(ttl),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn is_fresh(&self, stored_at: Instant) -> bool {
        self.ttl.is_none_or(|ttl| stored_at.elapsed() < ttl)
    }
}

#[async_trait]
impl StateCache for InMemoryStateCache {
    async fn get(&self, machine_id: &str) -> Result<Option<Machine>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(machine_id)
            .filter(|(_, stored_at)| self.is_fresh(*stored_at))
            .map(|(machine, _)| machine.clone()))
    }

    async fn put(&self, machine_id: &str, machine: Machine) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        let newer_cached = entries
            .get(machine_id)
            .is_some_and(|(existing, _)| existing.version > machine.version);
        if newer_cached {
            return Ok(());
        }
        entries.insert(machine_id.to_string(), (machine, Instant::now()));
        Ok(())
    }

    async fn invalidate(&self, machine_id: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(machine_id);
        Ok(())
    }
}
