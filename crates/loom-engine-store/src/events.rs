//! SQLite-backed session event log.
//!
//! Position assignment and row insertion happen inside one transaction
//! while holding the connection, so appends for a session are serialized
//! and positions stay contiguous even with concurrent writers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tokio::sync::Mutex;
use uuid::Uuid;

use loom_engine_core::error::Result;
use loom_engine_core::event::store::EventStore;
use loom_engine_core::event::{Event, EventName, EventRecord};

use crate::{delete_err, read_err, write_err};

pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

struct EventRow {
    session_id: String,
    position: i64,
    event_id: String,
    name: String,
    payload: String,
    timestamp: String,
}

impl EventRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            position: row.get(1)?,
            event_id: row.get(2)?,
            name: row.get(3)?,
            payload: row.get(4)?,
            timestamp: row.get(5)?,
        })
    }

    fn decode(self) -> std::result::Result<Event, String> {
        Ok(Event {
            id: Uuid::parse_str(&self.event_id).map_err(|e| e.to_string())?,
            session_id: Uuid::parse_str(&self.session_id).map_err(|e| e.to_string())?,
            name: EventName::parse(&self.name)
                .ok_or_else(|| format!("unknown event name {:?}", self.name))?,
            payload: serde_json::from_str(&self.payload).map_err(|e| e.to_string())?,
            timestamp: DateTime::parse_from_rfc3339(&self.timestamp)
                .map_err(|e| e.to_string())?
                .with_timezone(&Utc),
            position: self.position as u64,
        })
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(&self, session_id: Uuid, record: EventRecord) -> Result<Event> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(write_err)?;

        let position: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(position) + 1, 0) FROM events WHERE session_id = ?1",
                params![session_id.to_string()],
                |row| row.get(0),
            )
            .map_err(write_err)?;

        tx.execute(
            "INSERT INTO events (session_id, position, event_id, name, payload, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id.to_string(),
                position,
                record.id.to_string(),
                record.name.as_str(),
                record.payload.to_string(),
                record.timestamp.to_rfc3339(),
            ],
        )
        .map_err(write_err)?;

        tx.commit().map_err(write_err)?;

        Ok(Event {
            id: record.id,
            session_id,
            name: record.name,
            payload: record.payload,
            timestamp: record.timestamp,
            position: position as u64,
        })
    }

    async fn events(&self, session_id: Uuid) -> Result<Vec<Event>> {
        self.events_from(session_id, 0).await
    }

    async fn events_from(&self, session_id: Uuid, position: u64) -> Result<Vec<Event>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(
                "SELECT session_id, position, event_id, name, payload, timestamp
                 FROM events WHERE session_id = ?1 AND position >= ?2
                 ORDER BY position ASC",
            )
            .map_err(read_err)?;

        let rows = stmt
            .query_map(
                params![session_id.to_string(), position as i64],
                EventRow::from_row,
            )
            .map_err(read_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err)?;

        rows.into_iter()
            .map(|row| row.decode().map_err(read_err))
            .collect()
    }

    async fn list_sessions(&self) -> Result<Vec<Uuid>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT DISTINCT session_id FROM events ORDER BY session_id")
            .map_err(read_err)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(read_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err)?;
        ids.into_iter()
            .map(|raw| Uuid::parse_str(&raw).map_err(read_err))
            .collect()
    }

    async fn delete_session(&self, session_id: Uuid) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM events WHERE session_id = ?1",
            params![session_id.to_string()],
        )
        .map_err(delete_err)?;
        Ok(())
    }
}
