//! # guardian-db
//!
//! Database access layer for the Forest Guardian hub. Everything the hub
//! persists lives in one SQLite file, `<data_dir>/forest_guardian.db`.
//!
//! The access pattern is lopsided: a single writer (the store task)
//! commits radio traffic while HTTP handlers read concurrently. WAL mode
//! makes that safe, and a generous busy timeout covers the moments when a
//! burst of completed sessions and an operator query collide. Foreign
//! keys are enforced so a sync-queue entry can never outlive its
//! spectrogram. The schema version lives in `PRAGMA user_version` and is
//! advanced by [`migrations`].

pub mod migrations;
pub mod queries;
pub mod schema;

use std::path::Path;

use rusqlite::Connection;

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

/// Database file name under the hub data directory.
pub const DB_FILE_NAME: &str = "forest_guardian.db";

/// How long a blocked statement waits on the writer, milliseconds.
const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("schema migration: {0}")]
    Migration(String),

    #[error("no such row: {0}")]
    NotFound(String),

    #[error("constraint: {0}")]
    Constraint(String),

    #[error("encode: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open the hub database at `path`, creating it on first run. Applies
/// the connection tuning and brings the schema up to date.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    prepare(&conn)?;
    Ok(conn)
}

/// An in-memory database with the full schema, for tests.
pub fn open_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    prepare(&conn)?;
    Ok(conn)
}

/// Connection tuning plus schema bring-up, shared by both constructors.
fn prepare(conn: &Connection) -> Result<()> {
    // One writer, many readers: WAL lets the HTTP surface read while the
    // store task commits. In-memory databases silently stay on their own
    // journal mode, which is fine for tests.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;

    migrations::run(conn)
}
