//! # Event Store
//!
//! Append-only persistence for session event logs. The store is the source
//! of truth for a session: appends are atomic and durable before they are
//! acknowledged, positions are contiguous and 0-indexed, and appended
//! payloads are never mutated.
//!
//! [`InMemoryEventStore`] backs tests and single-process runs; the SQLite
//! implementation lives in the storage crate and shares this trait.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;

use super::{Event, EventRecord};

/// Append-only event log, keyed by session.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Atomically append `record`, assigning the next position for the
    /// session. Concurrent appends for one session are serialized.
    async fn append(&self, session_id: Uuid, record: EventRecord) -> Result<Event>;

    /// The full ordered log for a session. Unknown sessions read as empty.
    async fn events(&self, session_id: Uuid) -> Result<Vec<Event>>;

    /// Events at positions `>= position`.
    async fn events_from(&self, session_id: Uuid, position: u64) -> Result<Vec<Event>>;

    /// All sessions with at least one event.
    async fn list_sessions(&self) -> Result<Vec<Uuid>>;

    /// Remove all events for a session. Deleting an unknown session is a
    /// successful no-op.
    async fn delete_session(&self, session_id: Uuid) -> Result<()>;
}

/// Volatile event store for tests and single-process runs.
#[derive(Default)]
pub struct InMemoryEventStore {
    inner: RwLock<HashMap<Uuid, Vec<Event>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, session_id: Uuid, record: EventRecord) -> Result<Event> {
        let mut inner = self.inner.write().await;
        let log = inner.entry(session_id).or_default();
        let event = Event {
            id: record.id,
            session_id,
            name: record.name,
            payload: record.payload,
            timestamp: record.timestamp,
            position: log.len() as u64,
        };
        log.push(event.clone());
        Ok(event)
    }

    async fn events(&self, session_id: Uuid) -> Result<Vec<Event>> {
        let inner = self.inner.read().await;
        Ok(inner.get(&session_id).cloned().unwrap_or_default())
    }

    async fn events_from(&self, session_id: Uuid, position: u64) -> Result<Vec<Event>> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(&session_id)
            .map(|log| log.iter().skip(position as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn list_sessions(&self) -> Result<Vec<Uuid>> {
        let inner = self.inner.read().await;
        Ok(inner
            .iter()
            .filter(|(_, log)| !log.is_empty())
            .map(|(id, _)| *id)
            .collect())
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.remove(&session_id);
        Ok(())
    }
}
