//! # Loom Engine Store
//!
//! File-backed persistence for the engine's three storage contracts,
//! all sharing one SQLite database:
//!
//! - [`SqliteEventStore`]: the append-only session event log.
//! - [`SqliteSnapshotStore`]: advisory state snapshots.
//! - [`SqliteRecorder`]: content-addressed provider recordings.
//!
//! Because state, history, and recordings live in a file, sessions
//! survive process restarts: a paused session can be resumed by a later
//! process, and recordings made in one run drive playback in another.
//!
//! ```no_run
//! use loom_engine_store::Database;
//!
//! # fn demo() -> loom_engine_core::error::Result<()> {
//! let db = Database::open("loom.db")?;
//! let scaffold = loom_engine_core::Scaffold::builder()
//!     .store(db.event_store())
//!     .snapshots(db.snapshot_store())
//!     .recorder(db.recorder())
//!     .build();
//! # let _ = scaffold;
//! # Ok(())
//! # }
//! ```

mod events;
mod recordings;
mod schema;
mod snapshots;

pub use events::SqliteEventStore;
pub use recordings::SqliteRecorder;
pub use snapshots::SqliteSnapshotStore;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use loom_engine_core::error::{CoreError, Result};

/// Shared handle to one SQLite database. All store views created from a
/// `Database` serialize their access through the same connection, which
/// is what makes per-session appends atomic.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            CoreError::store_write(format!(
                "failed to open database {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_connection(conn)
    }

    /// Volatile database; used by tests that want SQL semantics without a
    /// file.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::store_write(format!("failed to open in-memory db: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn event_store(&self) -> Arc<SqliteEventStore> {
        Arc::new(SqliteEventStore::new(self.conn.clone()))
    }

    pub fn snapshot_store(&self) -> Arc<SqliteSnapshotStore> {
        Arc::new(SqliteSnapshotStore::new(self.conn.clone()))
    }

    pub fn recorder(&self) -> Arc<SqliteRecorder> {
        Arc::new(SqliteRecorder::new(self.conn.clone()))
    }
}

pub(crate) fn read_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::store_read(e.to_string())
}

pub(crate) fn write_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::store_write(e.to_string())
}

pub(crate) fn delete_err(e: impl std::fmt::Display) -> CoreError {
    CoreError::store_delete(e.to_string())
}
