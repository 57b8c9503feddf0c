//! # guardian-hub
//!
//! The hub side of Forest Guardian: a tokio daemon that
//!
//! 1. drains the radio into a bounded channel ([`rx`]),
//! 2. reassembles multi-packet spectrogram sessions ([`reassembler`]),
//! 3. classifies completed spectrograms through the tiered dispatcher
//!    ([`workers`]),
//! 4. persists records and fans out typed events ([`store`], [`events`]),
//! 5. re-classifies queued spectrograms when connectivity returns
//!    ([`sync`]), and
//! 6. serves the operator HTTP surface ([`http`]).

pub mod config;
pub mod events;
pub mod http;
pub mod png;
pub mod reassembler;
pub mod rx;
pub mod store;
pub mod sync;
pub mod workers;

/// Error types for hub operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("database: {0}")]
    Db(#[from] guardian_db::DbError),

    #[error("protocol: {0}")]
    Proto(#[from] guardian_proto::ProtoError),

    #[error("config: {0}")]
    Config(String),

    #[error("image: {0}")]
    Image(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;

/// Current Unix time in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
