//! Packet framing and deframing for the radio link.
//!
//! Every on-air packet carries the fixed 8-byte header followed by a
//! type-specific body. `parse` and `to_bytes` are mutual inverses for every
//! valid packet.

use guardian_types::EndMetadata;

use crate::{ProtoError, Result};

/// First two bytes of every framed packet.
pub const MAGIC: [u8; 2] = [0x46, 0x47];

/// Fixed header length: magic(2) + node hash(2) + type(1) + session(2) + seq(1).
pub const HEADER_LEN: usize = 8;

/// Maximum on-air packet length.
pub const MAX_PACKET_LEN: usize = 200;

/// Maximum body length per packet.
pub const MAX_BODY_LEN: usize = MAX_PACKET_LEN - HEADER_LEN;

/// Maximum spectrogram payload bytes carried per DATA packet.
pub const MAX_CHUNK_LEN: usize = 192;

/// Maximum node id length in a START body (excluding the NUL terminator).
pub const MAX_NODE_ID_LEN: usize = 20;

/// 16-bit multiplicative hash of an ASCII node id, identical on both ends
/// of the link.
pub fn node_hash(node_id: &str) -> u16 {
    let mut hash: u16 = 0;
    for byte in node_id.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u16);
    }
    hash
}

/// Packet type registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Standalone JSON telemetry (boot, heartbeat, alert, low battery).
    Json = 0x01,
    /// Opens a spectrogram transmission session.
    SpecStart = 0x10,
    /// One payload chunk of an open session.
    SpecData = 0x11,
    /// Closes a session, carrying the END metadata blob.
    SpecEnd = 0x12,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(PacketType::Json),
            0x10 => Ok(PacketType::SpecStart),
            0x11 => Ok(PacketType::SpecData),
            0x12 => Ok(PacketType::SpecEnd),
            other => Err(ProtoError::UnknownType(other)),
        }
    }
}

/// The fixed packet header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub node_hash: u16,
    pub packet_type: PacketType,
    pub session_id: u16,
    pub seq: u8,
}

/// Type-specific packet body.
#[derive(Clone, Debug, PartialEq)]
pub enum PacketBody {
    /// `[data_packets][payload_len be][node_id cstr]`
    Start {
        data_packets: u8,
        payload_len: u16,
        node_id: String,
    },
    /// Raw payload chunk. Byte N of the full payload lives at sequence
    /// `N / 192`, offset `N % 192`.
    Data { chunk: Vec<u8> },
    /// END metadata as a JSON blob.
    End { metadata: EndMetadata },
    /// A full JSON telemetry object.
    Json { body: Vec<u8> },
}

/// A complete framed packet.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub header: Header,
    pub body: PacketBody,
}

impl Packet {
    /// Frame a START packet for a new session.
    pub fn start(node_id: &str, session_id: u16, data_packets: u8, payload_len: u16) -> Result<Self> {
        if node_id.is_empty() || node_id.len() > MAX_NODE_ID_LEN || node_id.bytes().any(|b| b == 0) {
            return Err(ProtoError::BadNodeId(node_id.to_string()));
        }
        Ok(Self {
            header: Header {
                node_hash: node_hash(node_id),
                packet_type: PacketType::SpecStart,
                session_id,
                seq: 0,
            },
            body: PacketBody::Start {
                data_packets,
                payload_len,
                node_id: node_id.to_string(),
            },
        })
    }

    /// Frame one DATA chunk.
    pub fn data(node_hash: u16, session_id: u16, seq: u8, chunk: Vec<u8>) -> Result<Self> {
        if chunk.len() > MAX_CHUNK_LEN {
            return Err(ProtoError::PacketTooLarge(HEADER_LEN + chunk.len()));
        }
        Ok(Self {
            header: Header {
                node_hash,
                packet_type: PacketType::SpecData,
                session_id,
                seq,
            },
            body: PacketBody::Data { chunk },
        })
    }

    /// Frame the END packet with its metadata blob.
    pub fn end(node_hash: u16, session_id: u16, seq: u8, metadata: EndMetadata) -> Self {
        Self {
            header: Header {
                node_hash,
                packet_type: PacketType::SpecEnd,
                session_id,
                seq,
            },
            body: PacketBody::End { metadata },
        }
    }

    /// Frame a standalone JSON telemetry packet.
    pub fn json(node_hash: u16, body: Vec<u8>) -> Result<Self> {
        if body.len() > MAX_BODY_LEN {
            return Err(ProtoError::PacketTooLarge(HEADER_LEN + body.len()));
        }
        Ok(Self {
            header: Header {
                node_hash,
                packet_type: PacketType::Json,
                session_id: 0,
                seq: 0,
            },
            body: PacketBody::Json { body },
        })
    }

    /// Serialize to the on-air byte layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(MAX_PACKET_LEN);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.header.node_hash.to_be_bytes());
        out.push(self.header.packet_type as u8);
        out.extend_from_slice(&self.header.session_id.to_be_bytes());
        out.push(self.header.seq);

        match &self.body {
            PacketBody::Start {
                data_packets,
                payload_len,
                node_id,
            } => {
                out.push(*data_packets);
                out.extend_from_slice(&payload_len.to_be_bytes());
                out.extend_from_slice(node_id.as_bytes());
                out.push(0);
            }
            PacketBody::Data { chunk } => out.extend_from_slice(chunk),
            PacketBody::End { metadata } => {
                let blob = serde_json::to_vec(metadata)
                    .map_err(|e| ProtoError::MalformedBody(e.to_string()))?;
                out.extend_from_slice(&blob);
            }
            PacketBody::Json { body } => out.extend_from_slice(body),
        }

        if out.len() > MAX_PACKET_LEN {
            return Err(ProtoError::PacketTooLarge(out.len()));
        }
        Ok(out)
    }

    /// Parse a framed packet from received bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ProtoError::Truncated("header"));
        }
        if bytes[0..2] != MAGIC {
            return Err(ProtoError::MagicMismatch);
        }
        let node_hash = u16::from_be_bytes([bytes[2], bytes[3]]);
        let packet_type = PacketType::try_from(bytes[4])?;
        let session_id = u16::from_be_bytes([bytes[5], bytes[6]]);
        let seq = bytes[7];
        let body_bytes = &bytes[HEADER_LEN..];

        let body = match packet_type {
            PacketType::SpecStart => {
                if body_bytes.len() < 3 {
                    return Err(ProtoError::Truncated("start body"));
                }
                let data_packets = body_bytes[0];
                let payload_len = u16::from_be_bytes([body_bytes[1], body_bytes[2]]);
                let id_bytes = &body_bytes[3..];
                let end = id_bytes.iter().position(|&b| b == 0).unwrap_or(id_bytes.len());
                let node_id = std::str::from_utf8(&id_bytes[..end])
                    .map_err(|_| ProtoError::BadNodeId("non-utf8".into()))?
                    .to_string();
                if node_id.is_empty() || node_id.len() > MAX_NODE_ID_LEN {
                    return Err(ProtoError::BadNodeId(node_id));
                }
                PacketBody::Start {
                    data_packets,
                    payload_len,
                    node_id,
                }
            }
            PacketType::SpecData => {
                if body_bytes.is_empty() {
                    return Err(ProtoError::Truncated("data body"));
                }
                PacketBody::Data {
                    chunk: body_bytes.to_vec(),
                }
            }
            PacketType::SpecEnd => {
                // Tolerate garbage metadata the way the hub always has:
                // an unparseable blob degrades to defaults rather than
                // dropping the whole session.
                let trimmed = trim_trailing_nul(body_bytes);
                let metadata = serde_json::from_slice(trimmed).unwrap_or_default();
                PacketBody::End { metadata }
            }
            PacketType::Json => {
                if body_bytes.is_empty() {
                    return Err(ProtoError::Truncated("json body"));
                }
                PacketBody::Json {
                    body: body_bytes.to_vec(),
                }
            }
        };

        Ok(Self {
            header: Header {
                node_hash,
                packet_type,
                session_id,
                seq,
            },
            body,
        })
    }
}

/// How a raw received frame should be routed before full parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// Starts with the FG magic; parse with [`Packet::parse`].
    Framed,
    /// Looks like a bare JSON object (legacy telemetry without framing).
    BareJson,
    /// Neither; drop it.
    Unrecognized,
}

/// Cheap pre-classification of a received frame.
pub fn classify_frame(bytes: &[u8]) -> FrameKind {
    if bytes.len() >= HEADER_LEN && bytes[0..2] == MAGIC {
        FrameKind::Framed
    } else if bytes.first() == Some(&b'{') {
        FrameKind::BareJson
    } else {
        FrameKind::Unrecognized
    }
}

fn trim_trailing_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
    &bytes[..end]
}
