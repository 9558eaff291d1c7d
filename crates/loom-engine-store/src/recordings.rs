//! SQLite-backed provider recorder.
//!
//! Rows split across three tables: `recordings` (header + complete flag),
//! `recording_events` (ordered stream rows), `recording_results` (final
//! result, written at finalize). Starting a recording reclaims incomplete
//! predecessors for the hash inside the same transaction; finalizing
//! retires any older complete entry, keeping at most one complete
//! recording per hash.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tokio::sync::Mutex;
use uuid::Uuid;

use loom_engine_core::error::{CoreError, Result};
use loom_engine_core::provider::recorder::{ProviderRecorder, RecordingEntry, RecordingMeta};
use loom_engine_core::provider::{AgentResult, AgentStreamEvent};

use crate::{delete_err, read_err, write_err};

pub struct SqliteRecorder {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecorder {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

fn delete_recording_rows(tx: &Transaction<'_>, recording_id: &str) -> rusqlite::Result<()> {
    tx.execute(
        "DELETE FROM recording_events WHERE recording_id = ?1",
        params![recording_id],
    )?;
    tx.execute(
        "DELETE FROM recording_results WHERE recording_id = ?1",
        params![recording_id],
    )?;
    tx.execute(
        "DELETE FROM recordings WHERE recording_id = ?1",
        params![recording_id],
    )?;
    Ok(())
}

fn recording_ids_where(
    tx: &Transaction<'_>,
    sql: &str,
    args: impl rusqlite::Params,
) -> rusqlite::Result<Vec<String>> {
    let mut stmt = tx.prepare(sql)?;
    let ids = stmt
        .query_map(args, |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

#[async_trait]
impl ProviderRecorder for SqliteRecorder {
    async fn start_recording(&self, hash: &str, meta: RecordingMeta) -> Result<Uuid> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(write_err)?;

        // Reclaim crashed predecessors for this hash.
        let stale = recording_ids_where(
            &tx,
            "SELECT recording_id FROM recordings WHERE hash = ?1 AND complete = 0",
            params![hash],
        )
        .map_err(write_err)?;
        for id in stale {
            delete_recording_rows(&tx, &id).map_err(write_err)?;
        }

        let recording_id = Uuid::new_v4();
        tx.execute(
            "INSERT INTO recordings (recording_id, hash, prompt, provider, complete, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                recording_id.to_string(),
                hash,
                meta.prompt,
                meta.provider,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(write_err)?;

        tx.commit().map_err(write_err)?;
        Ok(recording_id)
    }

    async fn append_event(&self, recording_id: Uuid, event: &AgentStreamEvent) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(write_err)?;

        let position: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM recording_events WHERE recording_id = ?1",
                params![recording_id.to_string()],
                |row| row.get(0),
            )
            .map_err(write_err)?;

        let encoded = serde_json::to_string(event).map_err(CoreError::serialization)?;
        let inserted = tx
            .execute(
                "INSERT INTO recording_events (recording_id, position, event)
                 SELECT ?1, ?2, ?3
                 WHERE EXISTS (SELECT 1 FROM recordings WHERE recording_id = ?1)",
                params![recording_id.to_string(), position, encoded],
            )
            .map_err(write_err)?;
        if inserted == 0 {
            return Err(CoreError::store_write(format!(
                "unknown recording {recording_id}"
            )));
        }

        tx.commit().map_err(write_err)?;
        Ok(())
    }

    async fn finalize_recording(&self, recording_id: Uuid, result: &AgentResult) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(write_err)?;

        let hash: Option<String> = tx
            .query_row(
                "SELECT hash FROM recordings WHERE recording_id = ?1",
                params![recording_id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .map_err(write_err)?;
        let hash = hash.ok_or_else(|| {
            CoreError::store_write(format!("unknown recording {recording_id}"))
        })?;

        // A fresh complete recording supersedes any older complete one.
        let superseded = recording_ids_where(
            &tx,
            "SELECT recording_id FROM recordings
             WHERE hash = ?1 AND complete = 1 AND recording_id != ?2",
            params![hash, recording_id.to_string()],
        )
        .map_err(write_err)?;
        for id in superseded {
            delete_recording_rows(&tx, &id).map_err(write_err)?;
        }

        let encoded = serde_json::to_string(result).map_err(CoreError::serialization)?;
        tx.execute(
            "INSERT INTO recording_results (recording_id, result) VALUES (?1, ?2)
             ON CONFLICT(recording_id) DO UPDATE SET result = excluded.result",
            params![recording_id.to_string(), encoded],
        )
        .map_err(write_err)?;
        tx.execute(
            "UPDATE recordings SET complete = 1 WHERE recording_id = ?1",
            params![recording_id.to_string()],
        )
        .map_err(write_err)?;

        tx.commit().map_err(write_err)?;
        Ok(())
    }

    async fn load(&self, hash: &str) -> Result<Option<RecordingEntry>> {
        let conn = self.conn.lock().await;
        let header = conn
            .query_row(
                "SELECT recording_id, prompt, provider, created_at FROM recordings
                 WHERE hash = ?1 AND complete = 1",
                params![hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(read_err)?;

        let Some((recording_id, prompt, provider, created_at)) = header else {
            return Ok(None);
        };

        let mut stmt = conn
            .prepare(
                "SELECT event FROM recording_events WHERE recording_id = ?1
                 ORDER BY position ASC",
            )
            .map_err(read_err)?;
        let raw_events = stmt
            .query_map(params![recording_id], |row| row.get::<_, String>(0))
            .map_err(read_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err)?;
        let stream_data = raw_events
            .iter()
            .map(|raw| serde_json::from_str::<AgentStreamEvent>(raw))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(read_err)?;

        let raw_result: Option<String> = conn
            .query_row(
                "SELECT result FROM recording_results WHERE recording_id = ?1",
                params![recording_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(read_err)?;
        let result = raw_result
            .map(|raw| serde_json::from_str::<AgentResult>(&raw))
            .transpose()
            .map_err(read_err)?;

        Ok(Some(RecordingEntry {
            recording_id: Uuid::parse_str(&recording_id).map_err(read_err)?,
            hash: hash.to_string(),
            prompt,
            provider,
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map_err(read_err)?
                .with_timezone(&Utc),
            stream_data,
            result,
            complete: true,
        }))
    }

    async fn list(&self) -> Result<Vec<RecordingEntry>> {
        let hashes: Vec<(String, bool)> = {
            let conn = self.conn.lock().await;
            let mut stmt = conn
                .prepare("SELECT hash, complete FROM recordings ORDER BY created_at ASC")
                .map_err(read_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
                })
                .map_err(read_err)?
                .collect::<rusqlite::Result<Vec<_>>>()
                .map_err(read_err)?;
            rows
        };

        let mut entries = Vec::new();
        for (hash, complete) in hashes {
            if complete {
                if let Some(entry) = self.load(&hash).await? {
                    entries.push(entry);
                }
            } else {
                // Incomplete rows are listed as headers so operators can
                // see crashed recordings; they stay unloadable.
                let conn = self.conn.lock().await;
                let header = conn
                    .query_row(
                        "SELECT recording_id, prompt, provider, created_at FROM recordings
                         WHERE hash = ?1 AND complete = 0",
                        params![hash.clone()],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                            ))
                        },
                    )
                    .optional()
                    .map_err(read_err)?;
                if let Some((recording_id, prompt, provider, created_at)) = header {
                    entries.push(RecordingEntry {
                        recording_id: Uuid::parse_str(&recording_id).map_err(read_err)?,
                        hash,
                        prompt,
                        provider,
                        created_at: DateTime::parse_from_rfc3339(&created_at)
                            .map_err(read_err)?
                            .with_timezone(&Utc),
                        stream_data: Vec::new(),
                        result: None,
                        complete: false,
                    });
                }
            }
        }
        Ok(entries)
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(delete_err)?;
        let ids = recording_ids_where(
            &tx,
            "SELECT recording_id FROM recordings WHERE hash = ?1",
            params![hash],
        )
        .map_err(delete_err)?;
        for id in ids {
            delete_recording_rows(&tx, &id).map_err(delete_err)?;
        }
        tx.commit().map_err(delete_err)?;
        Ok(())
    }
}
