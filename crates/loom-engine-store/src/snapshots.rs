//! SQLite-backed state snapshots; one row per session, latest position
//! wins.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use uuid::Uuid;

use loom_engine_core::error::Result;
use loom_engine_core::event::snapshot::{StateSnapshot, StateSnapshotStore};

use crate::{delete_err, read_err, write_err};

pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StateSnapshotStore for SqliteSnapshotStore {
    async fn save(&self, snapshot: StateSnapshot) -> Result<()> {
        let conn = self.conn.lock().await;
        // Upsert, but never replace a newer snapshot with a stale one.
        conn.execute(
            "INSERT INTO snapshots (session_id, position, state, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                 position = excluded.position,
                 state = excluded.state,
                 created_at = excluded.created_at
             WHERE excluded.position >= snapshots.position",
            params![
                snapshot.session_id.to_string(),
                snapshot.position as i64,
                snapshot.state.to_string(),
                snapshot.created_at.to_rfc3339(),
            ],
        )
        .map_err(write_err)?;
        Ok(())
    }

    async fn latest(&self, session_id: Uuid) -> Result<Option<StateSnapshot>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT position, state, created_at FROM snapshots WHERE session_id = ?1",
                params![session_id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(read_err)?;

        match row {
            None => Ok(None),
            Some((position, state, created_at)) => Ok(Some(StateSnapshot {
                session_id,
                position: position as u64,
                state: serde_json::from_str(&state).map_err(read_err)?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map_err(read_err)?
                    .with_timezone(&Utc),
            })),
        }
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM snapshots WHERE session_id = ?1",
            params![session_id.to_string()],
        )
        .map_err(delete_err)?;
        Ok(())
    }
}
