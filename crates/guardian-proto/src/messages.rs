//! JSON telemetry message bodies.
//!
//! Nodes send standalone JSON packets for everything that is not a
//! spectrogram: boot notices, heartbeats, alert fallbacks, and low-battery
//! warnings. The hub answers heartbeats and alerts with a small JSON ack
//! body that satisfies the node's loose ACK predicate.

use serde::{Deserialize, Serialize};

use crate::{ProtoError, Result};

/// The `type` discriminator of a telemetry message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Boot,
    Heartbeat,
    Alert,
    LowBattery,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Boot => "boot",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Alert => "alert",
            MessageKind::LowBattery => "low_battery",
        }
    }
}

/// A node telemetry message. `node_id` and `type` are required; the rest
/// depends on the message kind.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeMessage {
    pub node_id: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl NodeMessage {
    pub fn heartbeat(node_id: &str, battery: u8, lat: f64, lon: f64, timestamp: u64) -> Self {
        Self {
            node_id: node_id.to_string(),
            kind: MessageKind::Heartbeat,
            confidence: None,
            lat: Some(lat),
            lon: Some(lon),
            battery: Some(battery),
            timestamp: Some(timestamp),
        }
    }

    pub fn alert(node_id: &str, confidence: u8, lat: f64, lon: f64, battery: u8) -> Self {
        Self {
            node_id: node_id.to_string(),
            kind: MessageKind::Alert,
            confidence: Some(confidence),
            lat: Some(lat),
            lon: Some(lon),
            battery: Some(battery),
            timestamp: None,
        }
    }

    pub fn boot(node_id: &str, battery: u8) -> Self {
        Self {
            node_id: node_id.to_string(),
            kind: MessageKind::Boot,
            confidence: None,
            lat: None,
            lon: None,
            battery: Some(battery),
            timestamp: None,
        }
    }

    pub fn low_battery(node_id: &str, battery: u8) -> Self {
        Self {
            node_id: node_id.to_string(),
            kind: MessageKind::LowBattery,
            confidence: None,
            lat: None,
            lon: None,
            battery: Some(battery),
            timestamp: None,
        }
    }

    /// Parse a telemetry body, mapping JSON errors and missing required
    /// keys to [`ProtoError::MalformedBody`].
    pub fn parse(body: &[u8]) -> Result<Self> {
        let msg: Self =
            serde_json::from_slice(body).map_err(|e| ProtoError::MalformedBody(e.to_string()))?;
        if msg.node_id.is_empty() {
            return Err(ProtoError::MalformedBody("empty node_id".into()));
        }
        Ok(msg)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ProtoError::MalformedBody(e.to_string()))
    }
}

/// Build the hub's ack body for a node. Carries all three markers the node
/// predicate accepts (the literal `ack`, the node's id, and `hub`) so any
/// firmware revision recognizes it.
pub fn ack_body(node_id: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "type": "ack",
        "node_id": node_id,
        "from": "hub",
    }))
    .unwrap_or_else(|_| b"{\"type\":\"ack\",\"from\":\"hub\"}".to_vec())
}

/// The node-side ACK predicate: deliberately loose for compatibility with
/// older hubs. Matches any body containing `ack`, `ACK`, the node's own
/// id, or `hub`.
pub fn is_ack_for(body: &[u8], node_id: &str) -> bool {
    let Ok(text) = std::str::from_utf8(body) else {
        return false;
    };
    text.contains("ack") || text.contains("ACK") || text.contains(node_id) || text.contains("hub")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_roundtrip() {
        let msg = NodeMessage::heartbeat("GUARDIAN_001", 78, 27.7172, 85.3240, 1_700_000_000);
        let bytes = msg.to_bytes().expect("serialize");
        let parsed = NodeMessage::parse(&bytes).expect("parse");
        assert_eq!(parsed.node_id, "GUARDIAN_001");
        assert_eq!(parsed.kind, MessageKind::Heartbeat);
        assert_eq!(parsed.battery, Some(78));
    }

    #[test]
    fn test_kind_serde_names() {
        let msg = NodeMessage::low_battery("N1", 3);
        let json = String::from_utf8(msg.to_bytes().expect("serialize")).expect("utf8");
        assert!(json.contains("\"type\":\"low_battery\""));
    }

    #[test]
    fn test_parse_rejects_missing_node_id() {
        assert!(NodeMessage::parse(b"{\"type\":\"heartbeat\"}").is_err());
        assert!(NodeMessage::parse(b"{\"node_id\":\"\",\"type\":\"boot\"}").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        assert!(NodeMessage::parse(b"{\"node_id\":\"N1\",\"type\":\"selfie\"}").is_err());
    }

    #[test]
    fn test_ack_predicate() {
        assert!(is_ack_for(b"ACK:GUARDIAN_001", "GUARDIAN_001"));
        assert!(is_ack_for(&ack_body("GUARDIAN_001"), "GUARDIAN_001"));
        assert!(is_ack_for(b"hello from hub", "GUARDIAN_001"));
        assert!(!is_ack_for(b"nothing relevant", "GUARDIAN_001"));
        assert!(!is_ack_for(&[0xFF, 0xFE], "GUARDIAN_001"));
    }

    #[test]
    fn test_optional_fields_omitted() {
        let msg = NodeMessage::boot("N1", 90);
        let json = String::from_utf8(msg.to_bytes().expect("serialize")).expect("utf8");
        assert!(!json.contains("confidence"));
        assert!(!json.contains("lat"));
    }
}
