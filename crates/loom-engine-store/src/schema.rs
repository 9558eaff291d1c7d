//! Table definitions. Two tables back the session log, three back the
//! recorder. Payload columns hold JSON text; ordering columns are plain
//! integers with composite primary keys.

use rusqlite::Connection;

use loom_engine_core::error::Result;

use crate::write_err;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS events (
            session_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            event_id TEXT NOT NULL,
            name TEXT NOT NULL,
            payload TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            PRIMARY KEY (session_id, position)
        );

        CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id);

        CREATE TABLE IF NOT EXISTS snapshots (
            session_id TEXT PRIMARY KEY,
            position INTEGER NOT NULL,
            state TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS recordings (
            recording_id TEXT PRIMARY KEY,
            hash TEXT NOT NULL,
            prompt TEXT NOT NULL,
            provider TEXT NOT NULL,
            complete INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_recordings_hash ON recordings(hash);

        CREATE TABLE IF NOT EXISTS recording_events (
            recording_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            event TEXT NOT NULL,
            PRIMARY KEY (recording_id, position),
            FOREIGN KEY (recording_id) REFERENCES recordings(recording_id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS recording_results (
            recording_id TEXT PRIMARY KEY,
            result TEXT NOT NULL,
            FOREIGN KEY (recording_id) REFERENCES recordings(recording_id) ON DELETE CASCADE
        );
        "#,
    )
    .map_err(write_err)?;

    Ok(())
}
