//! Checkpoint persistence
//!
//! A checkpoint is the full state of one thread plus where the state machine
//! should resume. [`InMemoryStore`] keeps them for the life of the process
//! with idle and capacity eviction; durable stores implement
//! [`CheckpointStore`] elsewhere.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::Result;
use crate::graph::Step;
use crate::state::ConversationState;

/// Where a thread's state machine stands between turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ThreadStatus {
    /// Nothing has run yet
    Fresh,
    /// Waiting for the next human message, then continuing at `resume_into`
    Suspended { resume_into: Step },
}

/// Persisted state of one thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    pub state: ConversationState,
    pub status: ThreadStatus,
    /// Unix timestamp (ms) of the last save
    pub updated_at: i64,
}

impl Checkpoint {
    pub fn fresh(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            state: ConversationState::new(),
            status: ThreadStatus::Fresh,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Step the next turn starts at
    pub fn resume_step(&self) -> Step {
        match self.status {
            ThreadStatus::Fresh => Step::Agent,
            ThreadStatus::Suspended { resume_into } => resume_into,
        }
    }
}

/// Storage for thread checkpoints
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Remove a thread. Returns whether it existed.
    async fn delete(&self, thread_id: &str) -> Result<bool>;

    /// Ids of every stored thread
    async fn list(&self) -> Result<Vec<String>>;
}

/// Limits for [`InMemoryStore`]
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Evict the least recently used thread beyond this many
    pub max_threads: usize,
    /// Evict threads untouched for this long
    pub idle_ttl: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_threads: 10_000,
            idle_ttl: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

struct Entry {
    checkpoint: Checkpoint,
    last_access: Instant,
}

/// Process-scoped checkpoint store
pub struct InMemoryStore {
    config: StoreConfig,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl InMemoryStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn evict_idle(&self, entries: &mut HashMap<String, Entry>, now: Instant) {
        let Some(ttl) = self.config.idle_ttl else {
            return;
        };
        entries.retain(|thread_id, entry| {
            let keep = now.duration_since(entry.last_access) < ttl;
            if !keep {
                tracing::debug!(thread_id = %thread_id, "evicting idle thread");
            }
            keep
        });
    }

    fn evict_overflow(&self, entries: &mut HashMap<String, Entry>) {
        while entries.len() > self.config.max_threads {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    tracing::debug!(thread_id = %id, "evicting least recently used thread");
                    entries.remove(&id);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.evict_idle(&mut entries, now);
        Ok(entries.get_mut(thread_id).map(|entry| {
            entry.last_access = now;
            entry.checkpoint.clone()
        }))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.evict_idle(&mut entries, now);
        entries.insert(
            checkpoint.thread_id.clone(),
            Entry {
                checkpoint: checkpoint.clone(),
                last_access: now,
            },
        );
        self.evict_overflow(&mut entries);
        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        Ok(self.entries.lock().remove(thread_id).is_some())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        self.evict_idle(&mut entries, now);
        let mut ids: Vec<String> = entries.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
