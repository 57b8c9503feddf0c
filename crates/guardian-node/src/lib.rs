//! # guardian-node
//!
//! The sensor-node side of Forest Guardian: a single cooperative loop
//! driving listen -> detect -> transmit -> heartbeat -> sleep. No threads;
//! a state enum advanced by a top-level `tick`, exactly like the deployed
//! firmware. Hardware sits behind the [`guardian_dsp::capture::AudioSource`],
//! [`guardian_radio::RadioLink`], and [`battery::BatteryMonitor`] seams so
//! the whole machine runs against synthetic inputs.

pub mod battery;
pub mod config;
pub mod scheduler;

pub use config::NodeConfig;
pub use scheduler::{NodeScheduler, NodeState};

/// Error types for the node loop.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("audio: {0}")]
    Audio(#[from] guardian_dsp::DspError),

    #[error("radio: {0}")]
    Radio(#[from] guardian_radio::RadioError),

    #[error("protocol: {0}")]
    Proto(#[from] guardian_proto::ProtoError),

    #[error("config: {0}")]
    Config(String),
}

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
