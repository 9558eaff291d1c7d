//! # Provider Recorder
//!
//! Content-addressed storage for agent stream recordings. A recording is
//! written incrementally (one row per streamed event, durable before the
//! event is released downstream) and marked complete only when the final
//! result lands. `load` never returns partial recordings, so a crash
//! mid-stream leaves garbage that the next `start_recording` for the same
//! hash reclaims.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{CoreError, Result};

use super::{AgentResult, AgentStreamEvent};

/// Descriptive fields attached to a recording at start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingMeta {
    pub prompt: String,
    pub provider: String,
}

/// A stored recording. `stream_data` preserves append order (including
/// the terminal `Result` event); `result` is set at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingEntry {
    pub recording_id: Uuid,
    pub hash: String,
    pub prompt: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub stream_data: Vec<AgentStreamEvent>,
    pub result: Option<AgentResult>,
    pub complete: bool,
}

/// Storage contract for recordings.
///
/// For any hash, at most one complete recording exists: starting a new
/// recording deletes prior incomplete rows for the hash, and finalizing
/// replaces any previously complete entry.
#[async_trait]
pub trait ProviderRecorder: Send + Sync {
    /// Begin an incomplete recording, reclaiming crashed predecessors
    /// that share `hash`.
    async fn start_recording(&self, hash: &str, meta: RecordingMeta) -> Result<Uuid>;

    /// Append one streamed event; durable before return.
    async fn append_event(&self, recording_id: Uuid, event: &AgentStreamEvent) -> Result<()>;

    /// Mark the recording complete with its final result.
    async fn finalize_recording(&self, recording_id: Uuid, result: &AgentResult) -> Result<()>;

    /// The complete recording for `hash`, if one exists. Incomplete
    /// recordings are invisible here.
    async fn load(&self, hash: &str) -> Result<Option<RecordingEntry>>;

    async fn list(&self) -> Result<Vec<RecordingEntry>>;

    async fn delete(&self, hash: &str) -> Result<()>;
}

/// Volatile recorder for tests and live runs that do not persist.
#[derive(Default)]
pub struct InMemoryRecorder {
    inner: Mutex<HashMap<Uuid, RecordingEntry>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProviderRecorder for InMemoryRecorder {
    async fn start_recording(&self, hash: &str, meta: RecordingMeta) -> Result<Uuid> {
        let mut inner = self.inner.lock().await;
        inner.retain(|_, entry| entry.hash != hash || entry.complete);
        let recording_id = Uuid::new_v4();
        inner.insert(
            recording_id,
            RecordingEntry {
                recording_id,
                hash: hash.to_string(),
                prompt: meta.prompt,
                provider: meta.provider,
                created_at: Utc::now(),
                stream_data: Vec::new(),
                result: None,
                complete: false,
            },
        );
        Ok(recording_id)
    }

    async fn append_event(&self, recording_id: Uuid, event: &AgentStreamEvent) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner.get_mut(&recording_id).ok_or_else(|| {
            CoreError::store_write(format!("unknown recording {recording_id}"))
        })?;
        entry.stream_data.push(event.clone());
        Ok(())
    }

    async fn finalize_recording(&self, recording_id: Uuid, result: &AgentResult) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let hash = match inner.get(&recording_id) {
            Some(entry) => entry.hash.clone(),
            None => {
                return Err(CoreError::store_write(format!(
                    "unknown recording {recording_id}"
                )))
            }
        };
        // A finalized recording supersedes any older complete entry for
        // the same hash.
        inner.retain(|id, entry| *id == recording_id || entry.hash != hash);
        let entry = inner.get_mut(&recording_id).expect("entry retained");
        entry.result = Some(result.clone());
        entry.complete = true;
        Ok(())
    }

    async fn load(&self, hash: &str) -> Result<Option<RecordingEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .values()
            .find(|entry| entry.hash == hash && entry.complete)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<RecordingEntry>> {
        let inner = self.inner.lock().await;
        let mut entries: Vec<RecordingEntry> = inner.values().cloned().collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.retain(|_, entry| entry.hash != hash);
        Ok(())
    }
}
