//! Spectrogram record queries.
//!
//! A record is inserted at reassembly completion with its classification
//! fields empty; the classifier workers fill them in asynchronously. After
//! that the record is immutable except for re-verification, which writes
//! classification once more with the deeper tier recorded.

use rusqlite::Connection;

use guardian_types::{ClassificationResult, Label, SpectrogramRecord, ThreatLevel};

use crate::{DbError, Result};

/// Fields needed to create a spectrogram record.
pub struct NewSpectrogram<'a> {
    pub node_id: &'a str,
    pub image_bytes: &'a [u8],
    pub lat: f64,
    pub lon: f64,
    pub anomaly_score: u8,
    pub received_at: u64,
    pub session_id: u16,
    pub rssi: i16,
    pub truncated: bool,
}

/// Insert a new spectrogram, returning its id.
pub fn insert(conn: &Connection, new: &NewSpectrogram<'_>) -> Result<i64> {
    conn.execute(
        "INSERT INTO spectrograms
         (node_id, image_bytes, lat, lon, anomaly_score, received_at, session_id, rssi, truncated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        rusqlite::params![
            new.node_id,
            new.image_bytes,
            new.lat,
            new.lon,
            new.anomaly_score as i64,
            new.received_at as i64,
            new.session_id as i64,
            new.rssi as i64,
            new.truncated,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Write classification results onto a spectrogram.
pub fn set_classification(
    conn: &Connection,
    id: i64,
    result: &ClassificationResult,
    classifier_used: &str,
    classified_at: u64,
) -> Result<()> {
    let features = serde_json::to_string(&result.features)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    let changed = conn.execute(
        "UPDATE spectrograms SET
             classification = ?2,
             confidence = ?3,
             threat_level = ?4,
             reasoning = ?5,
             features = ?6,
             classifier_used = ?7,
             classified_at = ?8
         WHERE id = ?1",
        rusqlite::params![
            id,
            result.label.as_str(),
            result.confidence as i64,
            result.threat_level.as_str(),
            result.reasoning,
            features,
            classifier_used,
            classified_at as i64,
        ],
    )?;
    if changed == 0 {
        return Err(DbError::NotFound(format!("spectrogram {id}")));
    }
    Ok(())
}

/// Get a spectrogram by id, including image bytes.
pub fn get(conn: &Connection, id: i64) -> Result<SpectrogramRecord> {
    conn.query_row(
        "SELECT id, node_id, image_bytes, lat, lon, anomaly_score, received_at, session_id,
                rssi, truncated, classification, confidence, threat_level, reasoning,
                features, classifier_used, classified_at
         FROM spectrograms WHERE id = ?1",
        [id],
        row_to_record,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(format!("spectrogram {id}")),
        other => DbError::Sqlite(other),
    })
}

/// List recent spectrograms (without image bytes), newest first.
pub fn list_recent(conn: &Connection, limit: usize) -> Result<Vec<SpectrogramRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, node_id, x'' AS image_bytes, lat, lon, anomaly_score, received_at,
                session_id, rssi, truncated, classification, confidence, threat_level,
                reasoning, features, classifier_used, classified_at
         FROM spectrograms ORDER BY received_at DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<SpectrogramRecord> {
    let features: Option<String> = row.get(14)?;
    let features = features
        .and_then(|s| serde_json::from_str::<Vec<String>>(&s).ok())
        .unwrap_or_default();
    let classification: Option<String> = row.get(10)?;
    let threat_level: Option<String> = row.get(12)?;
    Ok(SpectrogramRecord {
        id: row.get(0)?,
        node_id: row.get(1)?,
        image_bytes: row.get(2)?,
        lat: row.get(3)?,
        lon: row.get(4)?,
        anomaly_score: row.get::<_, i64>(5)?.clamp(0, 100) as u8,
        received_at: row.get::<_, i64>(6)? as u64,
        session_id: row.get::<_, i64>(7)? as u16,
        rssi: row.get::<_, i64>(8)? as i16,
        truncated: row.get(9)?,
        classification: classification.map(|s| Label::parse(&s)),
        confidence: row
            .get::<_, Option<i64>>(11)?
            .map(|c| c.clamp(0, 100) as u8),
        threat_level: threat_level.map(|s| ThreatLevel::parse(&s)),
        reasoning: row.get(13)?,
        features,
        classifier_used: row.get(15)?,
        classified_at: row.get::<_, Option<i64>>(16)?.map(|t| t as u64),
    })
}
