//! Node record queries.
//!
//! Nodes are created on first contact and updated on every subsequent
//! message; a duplicate key is always an update, never a failure.

use rusqlite::Connection;

use guardian_types::NodeRecord;

use crate::{DbError, Result};

/// Whether an upsert created the node or refreshed an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Insert or refresh a node record.
pub fn upsert(conn: &Connection, record: &NodeRecord) -> Result<UpsertOutcome> {
    let existed: bool = conn
        .query_row(
            "SELECT 1 FROM nodes WHERE node_id = ?1",
            [&record.node_id],
            |_| Ok(true),
        )
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(false),
            other => Err(DbError::Sqlite(other)),
        })?;

    conn.execute(
        "INSERT INTO nodes (node_id, last_seen, battery_percent, lat, lon, status, last_rssi)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(node_id) DO UPDATE SET
             last_seen = excluded.last_seen,
             battery_percent = excluded.battery_percent,
             lat = excluded.lat,
             lon = excluded.lon,
             status = excluded.status,
             last_rssi = excluded.last_rssi",
        rusqlite::params![
            record.node_id,
            record.last_seen as i64,
            record.battery_percent as i64,
            record.lat,
            record.lon,
            record.status,
            record.last_rssi as i64,
        ],
    )?;

    Ok(if existed {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Created
    })
}

/// Get a node by id.
pub fn get(conn: &Connection, node_id: &str) -> Result<NodeRecord> {
    conn.query_row(
        "SELECT node_id, last_seen, battery_percent, lat, lon, status, last_rssi
         FROM nodes WHERE node_id = ?1",
        [node_id],
        row_to_record,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("node {node_id}")),
        other => DbError::Sqlite(other),
    })
}

/// List all nodes, most recently seen first.
pub fn list(conn: &Connection) -> Result<Vec<NodeRecord>> {
    let mut stmt = conn.prepare(
        "SELECT node_id, last_seen, battery_percent, lat, lon, status, last_rssi
         FROM nodes ORDER BY last_seen DESC",
    )?;
    let rows = stmt
        .query_map([], row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<NodeRecord> {
    Ok(NodeRecord {
        node_id: row.get(0)?,
        last_seen: row.get::<_, i64>(1)? as u64,
        battery_percent: row.get::<_, i64>(2)?.clamp(0, 100) as u8,
        lat: row.get(3)?,
        lon: row.get(4)?,
        status: row.get(5)?,
        last_rssi: row.get::<_, i64>(6)? as i16,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn record(node_id: &str, last_seen: u64) -> NodeRecord {
        NodeRecord {
            node_id: node_id.to_string(),
            last_seen,
            battery_percent: 80,
            lat: 27.7172,
            lon: 85.3240,
            status: "active".to_string(),
            last_rssi: -90,
        }
    }

    #[test]
    fn test_upsert_creates_then_updates() {
        let conn = test_db();
        let outcome = upsert(&conn, &record("GUARDIAN_001", 100)).expect("upsert");
        assert_eq!(outcome, UpsertOutcome::Created);

        let mut updated = record("GUARDIAN_001", 200);
        updated.battery_percent = 60;
        let outcome = upsert(&conn, &updated).expect("upsert");
        assert_eq!(outcome, UpsertOutcome::Updated);

        let got = get(&conn, "GUARDIAN_001").expect("get");
        assert_eq!(got.last_seen, 200);
        assert_eq!(got.battery_percent, 60);
    }

    #[test]
    fn test_get_missing_node() {
        let conn = test_db();
        assert!(matches!(
            get(&conn, "NOBODY"),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_ordered_by_last_seen() {
        let conn = test_db();
        upsert(&conn, &record("GUARDIAN_001", 100)).expect("upsert");
        upsert(&conn, &record("GUARDIAN_002", 300)).expect("upsert");
        upsert(&conn, &record("GUARDIAN_003", 200)).expect("upsert");

        let nodes = list(&conn).expect("list");
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].node_id, "GUARDIAN_002");
        assert_eq!(nodes[2].node_id, "GUARDIAN_001");
    }
}
