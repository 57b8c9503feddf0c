//! Offline re-classification queue.
//!
//! When the cloud tiers are unreachable, spectrogram ids are ranked into
//! this queue; the sync worker drains it FIFO whenever connectivity
//! returns. Three failed attempts park an entry as `failed`.

use rusqlite::Connection;

use crate::{DbError, Result};

/// Retry attempts before an entry is parked.
const MAX_RETRIES: i64 = 3;

/// A pending queue entry.
#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub rank: i64,
    pub spectrogram_id: i64,
    pub enqueued_at: u64,
    pub retry_count: u32,
}

/// Append a spectrogram to the queue. Returns the assigned rank.
pub fn enqueue(conn: &Connection, spectrogram_id: i64, enqueued_at: u64) -> Result<i64> {
    conn.execute(
        "INSERT INTO sync_queue (spectrogram_id, enqueued_at) VALUES (?1, ?2)",
        rusqlite::params![spectrogram_id, enqueued_at as i64],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The oldest pending entry, if any.
pub fn next_pending(conn: &Connection) -> Result<Option<QueueEntry>> {
    conn.query_row(
        "SELECT rank, spectrogram_id, enqueued_at, retry_count
         FROM sync_queue WHERE status = 'pending'
         ORDER BY rank ASC LIMIT 1",
        [],
        |row| {
            Ok(QueueEntry {
                rank: row.get(0)?,
                spectrogram_id: row.get(1)?,
                enqueued_at: row.get::<_, i64>(2)? as u64,
                retry_count: row.get::<_, i64>(3)? as u32,
            })
        },
    )
    .map(Some)
    .or_else(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(DbError::Sqlite(other)),
    })
}

/// Mark an entry as synced.
pub fn mark_synced(conn: &Connection, rank: i64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE sync_queue SET status = 'synced' WHERE rank = ?1",
        [rank],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("sync queue rank {rank}")));
    }
    Ok(())
}

/// Record a failed attempt. The entry stays pending until the retry cap,
/// then parks as `failed`.
pub fn mark_failed(conn: &Connection, rank: i64, error: &str) -> Result<()> {
    let changed = conn.execute(
        "UPDATE sync_queue SET
             retry_count = retry_count + 1,
             last_error = ?2,
             status = CASE WHEN retry_count + 1 >= ?3 THEN 'failed' ELSE 'pending' END
         WHERE rank = ?1",
        rusqlite::params![rank, error, MAX_RETRIES],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("sync queue rank {rank}")));
    }
    Ok(())
}

/// Number of entries still pending.
pub fn pending_count(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sync_queue WHERE status = 'pending'",
        [],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::spectrograms::{self, NewSpectrogram};

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn insert_spectrogram(conn: &Connection) -> i64 {
        spectrograms::insert(
            conn,
            &NewSpectrogram {
                node_id: "GUARDIAN_001",
                image_bytes: &[0u8; 4],
                lat: 0.0,
                lon: 0.0,
                anomaly_score: 80,
                received_at: 1_700_000_000,
                session_id: 1,
                rssi: -80,
                truncated: false,
            },
        )
        .expect("insert spectrogram")
    }

    #[test]
    fn test_fifo_order() {
        let conn = test_db();
        let a = insert_spectrogram(&conn);
        let b = insert_spectrogram(&conn);
        let c = insert_spectrogram(&conn);
        enqueue(&conn, a, 100).expect("enqueue");
        enqueue(&conn, b, 200).expect("enqueue");
        enqueue(&conn, c, 300).expect("enqueue");

        let mut drained = Vec::new();
        while let Some(entry) = next_pending(&conn).expect("next") {
            drained.push(entry.spectrogram_id);
            mark_synced(&conn, entry.rank).expect("synced");
        }
        assert_eq!(drained, vec![a, b, c]);
        assert_eq!(pending_count(&conn).expect("count"), 0);
    }

    #[test]
    fn test_ranks_monotonically_increase() {
        let conn = test_db();
        let spec = insert_spectrogram(&conn);
        let r1 = enqueue(&conn, spec, 100).expect("enqueue");
        let r2 = enqueue(&conn, spec, 200).expect("enqueue");
        assert!(r2 > r1);
    }

    #[test]
    fn test_retry_cap_parks_entry() {
        let conn = test_db();
        let spec = insert_spectrogram(&conn);
        let rank = enqueue(&conn, spec, 100).expect("enqueue");

        mark_failed(&conn, rank, "timeout").expect("fail 1");
        assert!(next_pending(&conn).expect("next").is_some());
        mark_failed(&conn, rank, "timeout").expect("fail 2");
        assert!(next_pending(&conn).expect("next").is_some());
        mark_failed(&conn, rank, "timeout").expect("fail 3");
        assert!(next_pending(&conn).expect("next").is_none());
        assert_eq!(pending_count(&conn).expect("count"), 0);
    }

    #[test]
    fn test_enqueue_unknown_spectrogram_rejected() {
        let conn = test_db();
        // Foreign key enforcement.
        assert!(enqueue(&conn, 999, 100).is_err());
    }
}
