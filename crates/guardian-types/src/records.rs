//! Persisted record shapes and the reassembly hand-off value.
//!
//! All timestamps are Unix epoch seconds unless a field name says
//! otherwise (`*_ms` fields are milliseconds).

use serde::{Deserialize, Serialize};

use crate::classification::{Label, ThreatLevel};
use crate::Grid;

/// One sensor node as tracked by the hub. Created on first contact,
/// updated on every subsequent message, never deleted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub last_seen: u64,
    pub battery_percent: u8,
    pub lat: f64,
    pub lon: f64,
    pub status: String,
    pub last_rssi: i16,
}

/// A reconstructed spectrogram with its (eventually filled) classification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpectrogramRecord {
    pub id: i64,
    pub node_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub image_bytes: Vec<u8>,
    pub lat: f64,
    pub lon: f64,
    /// The node's own anomaly confidence from the END metadata (0..=100).
    pub anomaly_score: u8,
    pub received_at: u64,
    pub session_id: u16,
    pub rssi: i16,
    /// Set when the concatenated payload length disagreed with the
    /// announced length; the record still carries the best-effort decode.
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub classification: Option<Label>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub confidence: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub threat_level: Option<ThreatLevel>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub reasoning: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub classifier_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub classified_at: Option<u64>,
}

/// An operator-facing alert. At most one per spectrogram.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub node_id: String,
    pub confidence: u8,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: u64,
    pub analysis_text: String,
    pub responded: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub responded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub responded_at: Option<u64>,
    pub rssi: i16,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub spectrogram_id: Option<i64>,
}

/// Metadata carried in the SPEC_END packet body as a small JSON blob.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EndMetadata {
    /// Node-side anomaly confidence, 0..=100.
    #[serde(default)]
    pub conf: u8,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    /// Battery percentage at capture time. Defaults to 100 (USB-powered
    /// nodes report no battery).
    #[serde(default = "default_battery")]
    pub bat: u8,
}

fn default_battery() -> u8 {
    100
}

/// A completed reassembly, handed from the reassembler to the classifier
/// workers. The reassembler gives up ownership on emit.
#[derive(Clone, Debug)]
pub struct SpectrogramReceived {
    pub node_id: String,
    /// Row-major 32x32 grid, row 0 = highest frequency.
    pub grid: Grid,
    pub metadata: EndMetadata,
    /// Strongest RSSI observed across the session's packets.
    pub rssi_max: i16,
    pub session_id: u16,
    pub truncated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_metadata_defaults() {
        let meta: EndMetadata = serde_json::from_str("{}").expect("parse");
        assert_eq!(meta.conf, 0);
        assert_eq!(meta.bat, 100);
    }

    #[test]
    fn test_end_metadata_roundtrip() {
        let meta = EndMetadata {
            conf: 84,
            lat: 27.7172,
            lon: 85.3240,
            bat: 78,
        };
        let json = serde_json::to_string(&meta).expect("serialize");
        let back: EndMetadata = serde_json::from_str(&json).expect("parse");
        assert_eq!(back.conf, 84);
        assert_eq!(back.bat, 78);
        assert!((back.lat - 27.7172).abs() < 1e-9);
    }

    #[test]
    fn test_spectrogram_record_optional_fields_omitted() {
        let record = SpectrogramRecord {
            id: 1,
            node_id: "GUARDIAN_001".into(),
            image_bytes: Vec::new(),
            lat: 0.0,
            lon: 0.0,
            anomaly_score: 50,
            received_at: 1_700_000_000,
            session_id: 42,
            rssi: -80,
            truncated: false,
            classification: None,
            confidence: None,
            threat_level: None,
            reasoning: None,
            features: Vec::new(),
            classifier_used: None,
            classified_at: None,
        };
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(!json.contains("classification"));
        assert!(!json.contains("reasoning"));
    }
}
