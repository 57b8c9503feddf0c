//! Synthetic node traffic for a hub running without a transceiver
//! attached. Produces heartbeats, the occasional alert, and periodic
//! full spectrogram sessions so the whole reassembly and classification
//! pipeline can be exercised end to end.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use guardian_proto::messages::NodeMessage;
use guardian_proto::packet::{self, Packet};
use guardian_proto::codec;
use guardian_types::{EndMetadata, Grid, SPEC_HEIGHT, SPEC_WIDTH};

use crate::link::{ChannelActivity, RadioLink, Received};
use crate::{RadioParams, Result};

/// A radio that invents its own network.
pub struct SimulatedRadio {
    nodes: Vec<String>,
    interval: Duration,
    next_emit_at: Instant,
    queue: VecDeque<Received>,
    rng: StdRng,
    session_counter: u16,
}

impl SimulatedRadio {
    pub fn new(interval: Duration) -> Self {
        Self {
            nodes: vec![
                "GUARDIAN_001".to_string(),
                "GUARDIAN_002".to_string(),
                "GUARDIAN_003".to_string(),
            ],
            interval,
            next_emit_at: Instant::now() + interval,
            queue: VecDeque::new(),
            rng: StdRng::from_entropy(),
            session_counter: 0,
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(interval: Duration, seed: u64) -> Self {
        let mut sim = Self::new(interval);
        sim.rng = StdRng::seed_from_u64(seed);
        sim
    }

    fn rssi(&mut self) -> i16 {
        self.rng.gen_range(-120..-60)
    }

    fn emit_batch(&mut self) {
        let node = self.nodes[self.rng.gen_range(0..self.nodes.len())].clone();
        let roll: f64 = self.rng.gen();
        if roll < 0.70 {
            self.emit_heartbeat(&node);
        } else if roll < 0.85 {
            self.emit_alert(&node);
        } else {
            self.emit_spectrogram_session(&node);
        }
    }

    fn emit_heartbeat(&mut self, node: &str) {
        let battery = self.rng.gen_range(50..=100);
        let lat = 43.65 + self.rng.gen_range(-0.1..0.1);
        let lon = -79.38 + self.rng.gen_range(-0.1..0.1);
        let msg = NodeMessage::heartbeat(node, battery, lat, lon, 0);
        if let Ok(body) = msg.to_bytes() {
            if let Ok(pkt) = Packet::json(packet::node_hash(node), body) {
                if let Ok(bytes) = pkt.to_bytes() {
                    let rssi = self.rssi();
                    self.push(bytes, rssi);
                }
            }
        }
    }

    fn emit_alert(&mut self, node: &str) {
        let confidence = self.rng.gen_range(60..=95);
        let msg = NodeMessage::alert(node, confidence, 43.65, -79.38, 80);
        if let Ok(body) = msg.to_bytes() {
            if let Ok(pkt) = Packet::json(packet::node_hash(node), body) {
                if let Ok(bytes) = pkt.to_bytes() {
                    let rssi = self.rssi();
                    self.push(bytes, rssi);
                }
            }
        }
    }

    fn emit_spectrogram_session(&mut self, node: &str) {
        let hash = packet::node_hash(node);
        let session_id = self.session_counter;
        self.session_counter = self.session_counter.wrapping_add(1);

        // A plausible chainsaw-ish grid: strong bottom band, banded mids.
        let mut grid = Grid::new();
        for frame in 0..SPEC_WIDTH {
            for y in 0..SPEC_HEIGHT {
                let base = if y >= 3 * SPEC_HEIGHT / 4 {
                    220
                } else if y % 4 == 0 {
                    170
                } else {
                    90
                };
                let jitter: i16 = self.rng.gen_range(-20..20);
                grid.set(frame, y, (base as i16 + jitter).clamp(0, 255) as u8);
            }
        }
        let payload = codec::encode(&grid);

        let chunks: Vec<&[u8]> = payload.chunks(packet::MAX_CHUNK_LEN).collect();
        let Ok(start) = Packet::start(node, session_id, chunks.len() as u8, payload.len() as u16)
        else {
            return;
        };
        if let Ok(bytes) = start.to_bytes() {
            let rssi = self.rssi();
            self.push(bytes, rssi);
        }
        for (seq, chunk) in chunks.iter().enumerate() {
            if let Ok(pkt) = Packet::data(hash, session_id, seq as u8, chunk.to_vec()) {
                if let Ok(bytes) = pkt.to_bytes() {
                    let rssi = self.rssi();
                    self.push(bytes, rssi);
                }
            }
        }
        let meta = EndMetadata {
            conf: self.rng.gen_range(60..=95),
            lat: 43.65,
            lon: -79.38,
            bat: self.rng.gen_range(50..=100),
        };
        let end = Packet::end(hash, session_id, chunks.len() as u8, meta);
        if let Ok(bytes) = end.to_bytes() {
            let rssi = self.rssi();
            self.push(bytes, rssi);
        }
    }

    fn push(&mut self, bytes: Vec<u8>, rssi: i16) {
        self.queue.push_back(Received {
            bytes,
            rssi,
            snr: 8.0,
        });
    }
}

impl RadioLink for SimulatedRadio {
    fn transmit(&mut self, bytes: &[u8]) -> Result<()> {
        tracing::debug!(len = bytes.len(), "simulated radio swallowed transmit");
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<Received>> {
        if self.queue.is_empty() {
            let now = Instant::now();
            if now >= self.next_emit_at {
                self.emit_batch();
                self.next_emit_at = now + self.interval;
            } else {
                // Honor the timeout contract without busy-waiting.
                let wait = (self.next_emit_at - now).min(timeout);
                std::thread::sleep(wait);
                if Instant::now() >= self.next_emit_at {
                    self.emit_batch();
                    self.next_emit_at = Instant::now() + self.interval;
                }
            }
        }
        Ok(self.queue.pop_front())
    }

    fn scan_channel(&mut self) -> Result<ChannelActivity> {
        Ok(if self.queue.is_empty() {
            ChannelActivity::Idle
        } else {
            ChannelActivity::PreambleDetected
        })
    }

    fn sleep(&mut self) {}

    fn standby(&mut self) {}

    fn reset(&mut self, _params: RadioParams) -> Result<()> {
        Ok(())
    }
}
