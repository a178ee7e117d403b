pub mod chats;
pub mod clock;
pub mod error;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use tracing::info;

pub use clock::Clock;
pub use error::{StoreError, StoreResult};

/// SQLite-backed store for users, chats, participants and messages.
///
/// All access goes through a single connection behind a mutex. The guard is
/// held for exactly one logical operation, so every operation is also a
/// consistent snapshot; `with_tx` adds commit/rollback on top of that.
pub struct Database {
    conn: Mutex<Connection>,
    clock: Clock,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        let clock = match latest_timestamp(&conn)? {
            Some(floor) => Clock::resume_after(floor),
            None => Clock::new(),
        };
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
        })
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("DB lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run `f` inside a transaction. Commits on `Ok`, rolls back on `Err`
    /// (the transaction is dropped uncommitted).
    pub fn with_tx<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StoreResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("DB lock poisoned: {}", e)))?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Newest timestamp the clock has ever handed out for messages or clears.
fn latest_timestamp(conn: &Connection) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = conn.query_row(
        "SELECT MAX(ts) FROM (
             SELECT MAX(sent_at) AS ts FROM messages
             UNION ALL
             SELECT MAX(last_cleared_at) FROM chat_participants
         )",
        [],
        |row| row.get(0),
    )?;
    Ok(raw.as_deref().and_then(clock::parse_ts))
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> StoreResult<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> StoreResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
