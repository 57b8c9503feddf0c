//! Schema bring-up.
//!
//! Every schema revision is one entry in [`STEPS`]; a database at
//! `user_version = n` has had the first `n` steps applied. Bring-up
//! walks the remaining steps in order, bumping `user_version` after
//! each, so a fresh database and a half-migrated one take the same
//! path. Downgrades are not supported: a file written by a newer build
//! is refused rather than guessed at.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

type Step = fn(&Connection) -> Result<()>;

/// One function per schema revision, in order. `STEPS[n]` takes a
/// database from version `n` to `n + 1`.
const STEPS: &[Step] = &[step_initial_schema];

/// Bring the schema up to [`SCHEMA_VERSION`].
pub fn run(conn: &Connection) -> Result<()> {
    let mut version: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(DbError::Sqlite)?;

    if version > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "file is at schema v{version}, this build only knows v{SCHEMA_VERSION}"
        )));
    }

    while let Some(step) = STEPS.get(version as usize) {
        step(conn)?;
        version += 1;
        conn.pragma_update(None, "user_version", version)
            .map_err(DbError::Sqlite)?;
        tracing::info!(version, "schema step applied");
    }
    Ok(())
}

/// v0 -> v1: the initial tables and indexes.
fn step_initial_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(schema::SCHEMA_V1).map_err(DbError::Sqlite)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_conn() -> Connection {
        Connection::open_in_memory().expect("raw connection")
    }

    fn version_of(conn: &Connection) -> u32 {
        conn.pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("read user_version")
    }

    #[test]
    fn empty_database_reaches_current_version() {
        let conn = raw_conn();
        assert_eq!(version_of(&conn), 0);
        run(&conn).expect("bring-up");
        assert_eq!(version_of(&conn), SCHEMA_VERSION);
        assert_eq!(SCHEMA_VERSION as usize, STEPS.len());
    }

    #[test]
    fn bring_up_twice_changes_nothing() {
        let conn = raw_conn();
        run(&conn).expect("first");
        run(&conn).expect("second");
        assert_eq!(version_of(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn newer_file_is_refused() {
        let conn = raw_conn();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 7)
            .expect("fake future version");
        assert!(matches!(run(&conn), Err(DbError::Migration(_))));
        // And nothing was applied to it.
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                [],
                |row| row.get(0),
            )
            .expect("count tables");
        assert_eq!(tables, 0);
    }

    #[test]
    fn pipeline_tables_exist_after_bring_up() {
        let conn = raw_conn();
        run(&conn).expect("bring-up");
        // Everything the radio pipeline writes to, by name.
        for table in ["nodes", "spectrograms", "alerts", "sync_queue"] {
            let found: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap_or(0);
            assert_eq!(found, 1, "missing table {table}");
        }
    }
}
