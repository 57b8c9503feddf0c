//! # guardian-radio
//!
//! The radio link abstraction shared by node and hub. Both endpoints own
//! their transceiver exclusively; the [`link::RadioLink`] trait is the
//! seam between the pipeline and whatever drives the actual silicon.
//!
//! Channel parameters ([`params::RadioParams`]) must be identical at both
//! ends: carrier, bandwidth, spreading factor, coding rate, sync word,
//! and CRC.
//!
//! Two in-memory implementations ship here: [`loopback::LoopbackRadio`]
//! (a connected pair for tests, with drop/RSSI injection) and
//! [`sim::SimulatedRadio`] (synthetic node traffic for a hub without
//! hardware attached).

pub mod link;
pub mod loopback;
pub mod params;
pub mod sim;

pub use link::{ChannelActivity, RadioLink, Received};
pub use params::RadioParams;

/// Error types for radio operations.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    /// Driver reported a transmit failure.
    #[error("transmit failed: {0}")]
    Tx(String),

    /// Driver reported a receive failure.
    #[error("receive failed: {0}")]
    Rx(String),

    /// A prior error left the link unusable; re-initialize before the
    /// next call.
    #[error("link needs reset")]
    NeedsReset,

    /// Transceiver initialization failed.
    #[error("init failed: {0}")]
    Init(String),
}

/// Result type alias for radio operations.
pub type Result<T> = std::result::Result<T, RadioError>;
