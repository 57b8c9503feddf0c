//! Alert record queries. A spectrogram has at most one alert, enforced by
//! the UNIQUE constraint on `spectrogram_id`.

use rusqlite::Connection;

use guardian_types::AlertRecord;

use crate::{DbError, Result};

/// Fields needed to create an alert.
pub struct NewAlert<'a> {
    pub node_id: &'a str,
    pub confidence: u8,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: u64,
    pub analysis_text: &'a str,
    pub rssi: i16,
    pub spectrogram_id: Option<i64>,
}

/// Insert an alert, returning its id.
///
/// A second alert for the same spectrogram fails with
/// [`DbError::Constraint`]; callers treat that as already-alerted.
pub fn insert(conn: &Connection, new: &NewAlert<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO alerts
         (node_id, confidence, lat, lon, timestamp, analysis_text, rssi, spectrogram_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            new.node_id,
            new.confidence as i64,
            new.lat,
            new.lon,
            new.timestamp as i64,
            new.analysis_text,
            new.rssi as i64,
            new.spectrogram_id,
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DbError::Constraint(format!(
                "alert already exists for spectrogram {:?}",
                new.spectrogram_id
            ))
        }
        other => DbError::Sqlite(other),
    })?;
    Ok(conn.last_insert_rowid())
}

/// Mark an alert as responded.
pub fn respond(conn: &Connection, id: i64, responded_by: &str, responded_at: u64) -> Result<()> {
    let changed = conn.execute(
        "UPDATE alerts SET responded = 1, responded_by = ?2, responded_at = ?3 WHERE id = ?1",
        rusqlite::params![id, responded_by, responded_at as i64],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("alert {id}")));
    }
    Ok(())
}

/// List recent alerts, newest first, capped at `limit`.
pub fn list_recent(conn: &Connection, limit: usize) -> Result<Vec<AlertRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, node_id, confidence, lat, lon, timestamp, analysis_text,
                responded, responded_by, responded_at, rssi, spectrogram_id
         FROM alerts ORDER BY timestamp DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Get one alert by id.
pub fn get(conn: &Connection, id: i64) -> Result<AlertRecord> {
    conn.query_row(
        "SELECT id, node_id, confidence, lat, lon, timestamp, analysis_text,
                responded, responded_by, responded_at, rssi, spectrogram_id
         FROM alerts WHERE id = ?1",
        [id],
        row_to_record,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("alert {id}")),
        other => DbError::Sqlite(other),
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRecord> {
    Ok(AlertRecord {
        id: row.get(0)?,
        node_id: row.get(1)?,
        confidence: row.get::<_, i64>(2)?.clamp(0, 100) as u8,
        lat: row.get(3)?,
        lon: row.get(4)?,
        timestamp: row.get::<_, i64>(5)? as u64,
        analysis_text: row.get(6)?,
        responded: row.get(7)?,
        responded_by: row.get(8)?,
        responded_at: row.get::<_, Option<i64>>(9)?.map(|t| t as u64),
        rssi: row.get::<_, i64>(10)? as i16,
        spectrogram_id: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::spectrograms::{self, NewSpectrogram};

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn new_alert(spectrogram_id: Option<i64>) -> NewAlert<'static> {
        NewAlert {
            node_id: "GUARDIAN_001",
            confidence: 91,
            lat: 27.7172,
            lon: 85.3240,
            timestamp: 1_700_000_000,
            analysis_text: "chainsaw signature",
            rssi: -72,
            spectrogram_id,
        }
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
    fn test_insert_and_respond() {
        let conn = test_db();
        let id = insert(&conn, &new_alert(None)).expect("insert");
        respond(&conn, id, "ranger-7", 1_700_000_500).expect("respond");

        let got = get(&conn, id).expect("get");
        assert!(got.responded);
        assert_eq!(got.responded_by.as_deref(), Some("ranger-7"));
        assert_eq!(got.responded_at, Some(1_700_000_500));
    }

    #[test]
    fn test_one_alert_per_spectrogram() {
        let conn = test_db();
        let spec_id = insert_spectrogram(&conn);
        insert(&conn, &new_alert(Some(spec_id))).expect("first alert");
        assert!(matches!(
            insert(&conn, &new_alert(Some(spec_id))),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_multiple_alerts_without_spectrogram() {
        // NULLs are distinct for UNIQUE: standalone alerts coexist.
        let conn = test_db();
        insert(&conn, &new_alert(None)).expect("first");
        insert(&conn, &new_alert(None)).expect("second");
        assert_eq!(list_recent(&conn, 10).expect("list").len(), 2);
    }

    #[test]
    fn test_list_recent_capped() {
        let conn = test_db();
        for i in 0..5u64 {
            let mut alert = new_alert(None);
            alert.timestamp = 1_000 + i;
            insert(&conn, &alert).expect("insert");
        }
        let recent = list_recent(&conn, 3).expect("list");
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].timestamp, 1_004);
    }

    #[test]
    fn test_respond_missing_alert() {
        let conn = test_db();
        assert!(matches!(
            respond(&conn, 42, "ranger", 0),
            Err(DbError::NotFound(_))
        ));
    }
}
