//! # guardian-proto
//!
//! The binary wire protocol shared by Forest Guardian sensor nodes and the
//! hub:
//!
//! - **Packet framing** via [`packet`]: the `0x46 0x47` magic, node-hash,
//!   type, session and sequence header plus per-type bodies.
//! - **Spectrogram payload codec** via [`codec`]: 4-bit quantization with
//!   run-length encoding of the 32x32 mel grid.
//! - **JSON telemetry** via [`messages`]: boot, heartbeat, alert and
//!   low-battery messages, END-packet metadata and hub ACK bodies.
//!
//! ## On-air layout
//!
//! ```text
//! offset 0  [0x46 0x47]      magic
//! offset 2  [u16 be]         node hash
//! offset 4  [u8]             packet type (0x01 / 0x10 / 0x11 / 0x12)
//! offset 5  [u16 be]         session id
//! offset 7  [u8]             sequence number
//! offset 8  ...              type-specific body (<= 192 bytes)
//! ```

pub mod codec;
pub mod messages;
pub mod packet;

/// Error types for wire protocol operations.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// Packet does not begin with the FG magic bytes.
    #[error("magic mismatch")]
    MagicMismatch,

    /// Packet type byte is not in the registry.
    #[error("unknown packet type: {0:#04x}")]
    UnknownType(u8),

    /// Packet or payload ends before its declared content.
    #[error("truncated: {0}")]
    Truncated(&'static str),

    /// Serialized packet would exceed the radio MTU.
    #[error("packet too large: {0} bytes")]
    PacketTooLarge(usize),

    /// Node id in a START body is empty, overlong, or not valid UTF-8.
    #[error("bad node id: {0}")]
    BadNodeId(String),

    /// Spectrogram payload header is missing or malformed.
    #[error("bad payload header")]
    BadHeader,

    /// Payload header announces dimensions other than 32x32.
    #[error("dimension mismatch: {width}x{height}")]
    DimensionMismatch { width: u8, height: u8 },

    /// An RLE token with a zero run length.
    #[error("zero-length run at offset {0}")]
    BadRun(usize),

    /// JSON body failed to parse or is missing a required key.
    #[error("malformed body: {0}")]
    MalformedBody(String),
}

/// Result type alias for wire protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
