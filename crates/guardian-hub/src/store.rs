//! The store: single writer over the SQLite database, publishing a typed
//! event after every committed write.
//!
//! All writes serialize behind one async mutex; subscribers observe
//! events in commit order.

use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;

use guardian_classify::Outcome;
use guardian_db::queries::{alerts, nodes, spectrograms, sync_queue};
use guardian_db::DbError;
use guardian_proto::messages::{MessageKind, NodeMessage};
use guardian_types::{
    AlertRecord, ClassificationResult, Label, NodeRecord, SpectrogramReceived, SpectrogramRecord,
};

use crate::events::{EventBus, EventType};
use crate::{now_secs, Result};

/// Shared store handle.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    bus: EventBus,
}

impl Store {
    pub fn new(conn: Connection, bus: EventBus) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Ingest a JSON telemetry message: refresh the node record and, for
    /// explicit alerts, create an alert record.
    pub async fn ingest_telemetry(&self, message: &NodeMessage, rssi: i16) -> Result<()> {
        let now = now_secs();
        let record = NodeRecord {
            node_id: message.node_id.clone(),
            last_seen: message.timestamp.unwrap_or(now),
            battery_percent: message.battery.unwrap_or(100).min(100),
            lat: message.lat.unwrap_or(0.0),
            lon: message.lon.unwrap_or(0.0),
            status: match message.kind {
                MessageKind::LowBattery => "low_battery".to_string(),
                _ => "active".to_string(),
            },
            last_rssi: rssi,
        };

        let conn = self.conn.lock().await;
        let outcome = nodes::upsert(&conn, &record)?;
        drop(conn);

        let event_type = match outcome {
            nodes::UpsertOutcome::Created => EventType::NewNode,
            nodes::UpsertOutcome::Updated => EventType::NodeUpdate,
        };
        self.bus.emit(
            event_type,
            serde_json::json!({
                "node_id": record.node_id,
                "battery": record.battery_percent,
                "lat": record.lat,
                "lon": record.lon,
                "rssi": rssi,
                "kind": message.kind.as_str(),
            }),
        );

        if message.kind == MessageKind::Alert {
            self.insert_alert(
                &message.node_id,
                message.confidence.unwrap_or(0),
                message.lat.unwrap_or(0.0),
                message.lon.unwrap_or(0.0),
                "node-side anomaly alert (no spectrogram)",
                rssi,
                None,
            )
            .await?;
        }
        Ok(())
    }

    /// Persist a reconstructed spectrogram. Returns the record id.
    pub async fn insert_spectrogram(
        &self,
        spec: &SpectrogramReceived,
        png: &[u8],
    ) -> Result<i64> {
        let now = now_secs();
        let conn = self.conn.lock().await;
        let id = spectrograms::insert(
            &conn,
            &spectrograms::NewSpectrogram {
                node_id: &spec.node_id,
                image_bytes: png,
                lat: spec.metadata.lat,
                lon: spec.metadata.lon,
                anomaly_score: spec.metadata.conf,
                received_at: now,
                session_id: spec.session_id,
                rssi: spec.rssi_max,
                truncated: spec.truncated,
            },
        )?;
        // The node also just proved it is alive.
        nodes::upsert(
            &conn,
            &NodeRecord {
                node_id: spec.node_id.clone(),
                last_seen: now,
                battery_percent: spec.metadata.bat.min(100),
                lat: spec.metadata.lat,
                lon: spec.metadata.lon,
                status: "active".to_string(),
                last_rssi: spec.rssi_max,
            },
        )?;
        drop(conn);

        self.bus.emit(
            EventType::NewSpectrogram,
            serde_json::json!({
                "id": id,
                "node_id": spec.node_id,
                "session_id": spec.session_id,
                "anomaly_score": spec.metadata.conf,
                "rssi": spec.rssi_max,
                "truncated": spec.truncated,
            }),
        );
        Ok(id)
    }

    /// Write classification results and emit `spectrogram_analyzed`.
    pub async fn apply_classification(
        &self,
        id: i64,
        result: &ClassificationResult,
        classifier_used: &str,
    ) -> Result<()> {
        let now = now_secs();
        let conn = self.conn.lock().await;
        spectrograms::set_classification(&conn, id, result, classifier_used, now)?;
        drop(conn);

        self.bus.emit(
            EventType::SpectrogramAnalyzed,
            serde_json::json!({
                "id": id,
                "classification": result.label.as_str(),
                "confidence": result.confidence,
                "threat_level": result.threat_level.as_str(),
                "classifier_used": classifier_used,
            }),
        );
        Ok(())
    }

    /// Store the outcome of a classification dispatch, creating an alert
    /// for alerting threat levels.
    pub async fn apply_outcome(
        &self,
        spectrogram_id: i64,
        spec: &SpectrogramReceived,
        outcome: &Outcome,
    ) -> Result<()> {
        self.apply_classification(spectrogram_id, &outcome.result, outcome.tier.as_str())
            .await?;

        if outcome.result.threat_level.is_alerting() {
            let analysis = outcome
                .result
                .reasoning
                .clone()
                .unwrap_or_else(|| format!("{} detected", outcome.result.label));
            // A truncated reconstruction still alerts, flagged as such.
            let analysis = if spec.truncated {
                format!("{analysis} [reduced confidence: partial spectrogram]")
            } else {
                analysis
            };
            self.insert_alert(
                &spec.node_id,
                outcome.result.confidence,
                spec.metadata.lat,
                spec.metadata.lon,
                &analysis,
                spec.rssi_max,
                Some(spectrogram_id),
            )
            .await?;
        }
        Ok(())
    }

    /// Persist an undecodable reassembly: the raw concatenated bytes are
    /// kept, and a reduced-confidence alert is raised when the node's own
    /// anomaly score was high. A failed decode never silently drops a
    /// potential threat.
    pub async fn insert_partial(
        &self,
        node_id: &str,
        session_id: u16,
        metadata: &guardian_types::EndMetadata,
        rssi: i16,
        raw: &[u8],
        error: &str,
    ) -> Result<i64> {
        let now = now_secs();
        let conn = self.conn.lock().await;
        let id = spectrograms::insert(
            &conn,
            &spectrograms::NewSpectrogram {
                node_id,
                image_bytes: raw,
                lat: metadata.lat,
                lon: metadata.lon,
                anomaly_score: metadata.conf,
                received_at: now,
                session_id,
                rssi,
                truncated: true,
            },
        )?;
        drop(conn);

        self.bus.emit(
            EventType::NewSpectrogram,
            serde_json::json!({
                "id": id,
                "node_id": node_id,
                "session_id": session_id,
                "anomaly_score": metadata.conf,
                "rssi": rssi,
                "truncated": true,
                "decode_error": error,
            }),
        );

        if metadata.conf >= 60 {
            self.insert_alert(
                node_id,
                metadata.conf,
                metadata.lat,
                metadata.lon,
                &format!("undecodable spectrogram, node-side score only ({error})"),
                rssi,
                Some(id),
            )
            .await?;
        }
        Ok(id)
    }

    /// Record that all classification tiers failed; the spectrogram is
    /// stored as unknown and queued for later re-classification.
    pub async fn mark_unclassified(&self, spectrogram_id: i64) -> Result<()> {
        let result = ClassificationResult::new(Label::Unknown, 0);
        let conn = self.conn.lock().await;
        spectrograms::set_classification(&conn, spectrogram_id, &result, "none", now_secs())?;
        sync_queue::enqueue(&conn, spectrogram_id, now_secs())?;
        drop(conn);
        self.bus.emit(
            EventType::SpectrogramAnalyzed,
            serde_json::json!({
                "id": spectrogram_id,
                "classification": "unknown",
                "classifier_used": "none",
            }),
        );
        Ok(())
    }

    /// Rank a spectrogram into the offline sync queue.
    pub async fn enqueue_sync(&self, spectrogram_id: i64) -> Result<i64> {
        let conn = self.conn.lock().await;
        let rank = sync_queue::enqueue(&conn, spectrogram_id, now_secs())?;
        Ok(rank)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_alert(
        &self,
        node_id: &str,
        confidence: u8,
        lat: f64,
        lon: f64,
        analysis_text: &str,
        rssi: i16,
        spectrogram_id: Option<i64>,
    ) -> Result<Option<i64>> {
        let conn = self.conn.lock().await;
        let result = alerts::insert(
            &conn,
            &alerts::NewAlert {
                node_id,
                confidence,
                lat,
                lon,
                timestamp: now_secs(),
                analysis_text,
                rssi,
                spectrogram_id,
            },
        );
        drop(conn);

        match result {
            Ok(id) => {
                self.bus.emit(
                    EventType::NewAlert,
                    serde_json::json!({
                        "id": id,
                        "node_id": node_id,
                        "confidence": confidence,
                        "lat": lat,
                        "lon": lon,
                        "rssi": rssi,
                        "spectrogram_id": spectrogram_id,
                    }),
                );
                Ok(Some(id))
            }
            // Already alerted for this spectrogram; not a failure.
            Err(DbError::Constraint(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn respond_alert(&self, id: i64, responded_by: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        alerts::respond(&conn, id, responded_by, now_secs())?;
        Ok(())
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeRecord>> {
        let conn = self.conn.lock().await;
        Ok(nodes::list(&conn)?)
    }

    pub async fn list_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        let conn = self.conn.lock().await;
        Ok(alerts::list_recent(&conn, limit)?)
    }

    pub async fn get_spectrogram(&self, id: i64) -> Result<SpectrogramRecord> {
        let conn = self.conn.lock().await;
        Ok(spectrograms::get(&conn, id)?)
    }

    pub async fn list_spectrograms(&self, limit: usize) -> Result<Vec<SpectrogramRecord>> {
        let conn = self.conn.lock().await;
        Ok(spectrograms::list_recent(&conn, limit)?)
    }

    pub async fn next_sync_entry(&self) -> Result<Option<sync_queue::QueueEntry>> {
        let conn = self.conn.lock().await;
        Ok(sync_queue::next_pending(&conn)?)
    }

    pub async fn sync_entry_done(&self, rank: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        Ok(sync_queue::mark_synced(&conn, rank)?)
    }

    pub async fn sync_entry_failed(&self, rank: i64, error: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        Ok(sync_queue::mark_failed(&conn, rank, error)?)
    }

    pub async fn sync_pending_count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        Ok(sync_queue::pending_count(&conn)?)
    }
}
