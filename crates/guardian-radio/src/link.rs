//! The radio link trait and its failure semantics.

use std::time::Duration;

use crate::{RadioParams, Result};

/// A received frame with its signal quality readings.
#[derive(Clone, Debug)]
pub struct Received {
    pub bytes: Vec<u8>,
    /// Packet RSSI in dBm.
    pub rssi: i16,
    /// Signal-to-noise ratio in dB.
    pub snr: f32,
}

/// Result of a channel activity scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelActivity {
    Idle,
    PreambleDetected,
}

/// An exclusively-owned transceiver.
///
/// Failure semantics: any `Tx`/`Rx` error leaves the link in a
/// needs-reset state; every call after that fails with
/// [`crate::RadioError::NeedsReset`] until [`RadioLink::reset`] succeeds.
/// Nothing is retried at this layer; retry belongs to the enclosing
/// loop.
pub trait RadioLink {
    /// Blocking transmit. Returns when the radio reports completion.
    fn transmit(&mut self, bytes: &[u8]) -> Result<()>;

    /// Blocking receive, waiting up to `timeout`. `Ok(None)` on timeout.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Received>>;

    /// Quick channel activity check without a full receive.
    fn scan_channel(&mut self) -> Result<ChannelActivity>;

    /// Enter low-power sleep.
    fn sleep(&mut self);

    /// Return to standby, ready for the next transmit/receive.
    fn standby(&mut self);

    /// Re-initialize after an error. Clears the needs-reset state.
    fn reset(&mut self, params: RadioParams) -> Result<()>;
}
