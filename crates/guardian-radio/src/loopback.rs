//! In-memory loopback link: two connected ends for exercising the node
//! and hub pipelines without hardware.
//!
//! Each end owns a receive queue fed by the peer's transmits. Tests can
//! inject RSSI/SNR readings, drop a fraction of frames, and force error
//! states to exercise the needs-reset path.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::link::{ChannelActivity, RadioLink, Received};
use crate::{RadioError, RadioParams, Result};

#[derive(Debug)]
struct Shared {
    queue: VecDeque<Received>,
    /// Every Nth transmit into this end is dropped (0 = never).
    drop_every: usize,
    sent_count: usize,
}

/// One end of a loopback pair.
pub struct LoopbackRadio {
    /// Frames destined for this end.
    inbox: Arc<Mutex<Shared>>,
    /// The peer's inbox, where our transmits land.
    peer: Arc<Mutex<Shared>>,
    rssi: i16,
    snr: f32,
    needs_reset: bool,
    fail_next_tx: bool,
}

impl LoopbackRadio {
    /// Create a connected pair.
    pub fn pair() -> (LoopbackRadio, LoopbackRadio) {
        let a = Arc::new(Mutex::new(Shared {
            queue: VecDeque::new(),
            drop_every: 0,
            sent_count: 0,
        }));
        let b = Arc::new(Mutex::new(Shared {
            queue: VecDeque::new(),
            drop_every: 0,
            sent_count: 0,
        }));
        (
            LoopbackRadio {
                inbox: a.clone(),
                peer: b.clone(),
                rssi: -80,
                snr: 7.5,
                needs_reset: false,
                fail_next_tx: false,
            },
            LoopbackRadio {
                inbox: b,
                peer: a,
                rssi: -80,
                snr: 7.5,
                needs_reset: false,
                fail_next_tx: false,
            },
        )
    }

    /// RSSI stamped onto frames this end transmits.
    pub fn set_rssi(&mut self, rssi: i16) {
        self.rssi = rssi;
    }

    /// Drop every Nth frame arriving at this end (simulated loss).
    pub fn set_drop_every(&self, n: usize) {
        self.inbox.lock().expect("lock").drop_every = n;
    }

    /// Make the next transmit fail, driving the link into needs-reset.
    pub fn fail_next_transmit(&mut self) {
        self.fail_next_tx = true;
    }

    /// Frames waiting in this end's queue.
    pub fn pending(&self) -> usize {
        self.inbox.lock().expect("lock").queue.len()
    }

    /// Push a frame directly into this end's queue (test injection).
    pub fn inject(&self, bytes: Vec<u8>, rssi: i16) {
        self.inbox.lock().expect("lock").queue.push_back(Received {
            bytes,
            rssi,
            snr: 7.5,
        });
    }
}

impl RadioLink for LoopbackRadio {
    fn transmit(&mut self, bytes: &[u8]) -> Result<()> {
        if self.needs_reset {
            return Err(RadioError::NeedsReset);
        }
        if self.fail_next_tx {
            self.fail_next_tx = false;
            self.needs_reset = true;
            return Err(RadioError::Tx("injected failure".into()));
        }
        let mut peer = self.peer.lock().expect("lock");
        peer.sent_count += 1;
        if peer.drop_every != 0 && peer.sent_count % peer.drop_every == 0 {
            tracing::trace!(len = bytes.len(), "loopback dropped frame");
            return Ok(());
        }
        peer.queue.push_back(Received {
            bytes: bytes.to_vec(),
            rssi: self.rssi,
            snr: self.snr,
        });
        Ok(())
    }

    fn receive(&mut self, _timeout: Duration) -> Result<Option<Received>> {
        if self.needs_reset {
            return Err(RadioError::NeedsReset);
        }
        Ok(self.inbox.lock().expect("lock").queue.pop_front())
    }

    fn scan_channel(&mut self) -> Result<ChannelActivity> {
        if self.needs_reset {
            return Err(RadioError::NeedsReset);
        }
        if self.pending() > 0 {
            Ok(ChannelActivity::PreambleDetected)
        } else {
            Ok(ChannelActivity::Idle)
        }
    }

    fn sleep(&mut self) {}

    fn standby(&mut self) {}

    fn reset(&mut self, _params: RadioParams) -> Result<()> {
        self.needs_reset = false;
        Ok(())
    }
}
