//! Optional state snapshots, keyed by `(session, position)`.
//!
//! Snapshots are an advisory read optimization: resuming a session must
//! tolerate a missing or stale snapshot by falling back to full replay of
//! the event log, which stays authoritative.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;

/// A materialized state at a given log position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub session_id: Uuid,
    /// Number of events folded into `state`; the snapshot agrees with
    /// `compute_state_at(events, position)`.
    pub position: u64,
    pub state: Value,
    pub created_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn new(session_id: Uuid, position: u64, state: Value) -> Self {
        Self {
            session_id,
            position,
            state,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait StateSnapshotStore: Send + Sync {
    async fn save(&self, snapshot: StateSnapshot) -> Result<()>;

    /// The snapshot with the highest position for a session, if any.
    async fn latest(&self, session_id: Uuid) -> Result<Option<StateSnapshot>>;

    async fn delete(&self, session_id: Uuid) -> Result<()>;
}

/// Volatile snapshot store keeping only the latest snapshot per session.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    inner: RwLock<HashMap<Uuid, StateSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateSnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: StateSnapshot) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.get(&snapshot.session_id) {
            Some(existing) if existing.position > snapshot.position => {}
            _ => {
                inner.insert(snapshot.session_id, snapshot);
            }
        }
        Ok(())
    }

    async fn latest(&self, session_id: Uuid) -> Result<Option<StateSnapshot>> {
        let inner = self.inner.read().await;
        Ok(inner.get(&session_id).cloned())
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.remove(&session_id);
        Ok(())
    }
}
