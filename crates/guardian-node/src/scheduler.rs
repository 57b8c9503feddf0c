//! The node state machine.
//!
//! A single cooperative loop: the owner calls [`NodeScheduler::tick`] with
//! the current time and the machine performs at most one blocking phase
//! per call (a window read, a transmission episode, or a heartbeat with
//! its ACK window). The loop owner must tick at least every 8 seconds to
//! keep the hardware watchdog released.

use std::time::Duration;

use guardian_dsp::capture::{remove_dc, AudioSource};
use guardian_dsp::gate::{AnomalyGate, BandProfile, GateDecision};
use guardian_dsp::spectrogram::SpectrogramEngine;
use guardian_dsp::WINDOW_LEN;
use guardian_proto::codec;
use guardian_proto::messages::{self, NodeMessage};
use guardian_proto::packet::{self, Packet, PacketType, MAX_CHUNK_LEN};
use guardian_radio::{RadioLink, Received};
use guardian_types::{EndMetadata, Grid};

use crate::battery::BatteryMonitor;
use crate::config::NodeConfig;
use crate::{NodeError, Result};

/// Without an ACK for this long, `hub_connected` clears.
const ACK_STALE_MS: u64 = 5 * 60 * 1000;

/// Frames examined per ACK window before giving up.
const ACK_MAX_FRAMES: usize = 4;

/// Node loop states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    Boot,
    Init,
    Listening,
    AnomalyPending,
    Transmitting,
    Heartbeat,
    LowBattery,
    Error,
    Sleep,
}

/// Counters exposed for telemetry and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeStats {
    pub windows_processed: u64,
    pub anomalies_detected: u64,
    pub spectrograms_sent: u64,
    pub packets_sent: u64,
    pub tx_failures: u64,
    pub heartbeats_sent: u64,
    pub json_fallbacks: u64,
}

/// The cooperative node scheduler.
pub struct NodeScheduler<A, R, B> {
    config: NodeConfig,
    node_hash: u16,
    audio: A,
    radio: R,
    battery: B,
    engine: SpectrogramEngine,
    gate: AnomalyGate,
    state: NodeState,
    window: Vec<i16>,
    pending_grid: Option<Grid>,
    session_counter: u16,
    last_heartbeat_at: u64,
    hub_connected: bool,
    last_ack_at: u64,
    sleep_until: u64,
    pub stats: NodeStats,
}

impl<A, R, B> NodeScheduler<A, R, B>
where
    A: AudioSource,
    R: RadioLink,
    B: BatteryMonitor,
{
    pub fn new(config: NodeConfig, audio: A, radio: R, battery: B) -> Self {
        let gate = AnomalyGate::new(config.gate_config());
        let node_hash = packet::node_hash(&config.node_id);
        Self {
            config,
            node_hash,
            audio,
            radio,
            battery,
            engine: SpectrogramEngine::new(),
            gate,
            state: NodeState::Boot,
            window: vec![0i16; WINDOW_LEN],
            pending_grid: None,
            session_counter: 0,
            last_heartbeat_at: 0,
            hub_connected: false,
            last_ack_at: 0,
            sleep_until: 0,
            stats: NodeStats::default(),
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn hub_connected(&self) -> bool {
        self.hub_connected
    }

    /// Advance the machine by one phase.
    pub fn tick(&mut self, now_ms: u64) -> NodeState {
        // A stale ACK clears the connectivity flag wherever we are.
        if self.hub_connected && now_ms.saturating_sub(self.last_ack_at) > ACK_STALE_MS {
            self.hub_connected = false;
            tracing::info!("hub link considered lost, no ACK in 5 minutes");
        }

        // Battery diverts from any active state; the LowBattery handler
        // runs on the next tick like every other phase.
        if !matches!(
            self.state,
            NodeState::Boot | NodeState::LowBattery | NodeState::Sleep
        ) && self.battery.percent() < self.config.low_battery_pct
        {
            tracing::warn!(percent = self.battery.percent(), "battery critical");
            self.state = NodeState::LowBattery;
            return self.state;
        }

        let next = match self.state {
            NodeState::Boot => NodeState::Init,
            NodeState::Init => self.do_init(now_ms),
            NodeState::Listening => self.do_listen(now_ms),
            NodeState::AnomalyPending => self.do_anomaly_pending(now_ms),
            NodeState::Transmitting => self.do_transmit(now_ms),
            NodeState::Heartbeat => self.do_heartbeat(now_ms),
            NodeState::LowBattery => self.do_low_battery(now_ms),
            NodeState::Error => NodeState::Init,
            NodeState::Sleep => self.do_sleep(now_ms),
        };

        if next != self.state {
            tracing::debug!(from = ?self.state, to = ?next, "state transition");
        }
        self.state = next;
        self.state
    }

    fn do_init(&mut self, now_ms: u64) -> NodeState {
        if let Err(e) = self.radio.reset(self.config.radio) {
            tracing::error!(error = %e, "radio init failed");
            return NodeState::Error;
        }
        // Boot notice is best effort; the hub learns about us either way.
        let battery = self.battery.percent();
        if let Err(e) = self.send_json(&NodeMessage::boot(&self.config.node_id, battery)) {
            tracing::warn!(error = %e, "boot notice failed");
        }
        self.last_heartbeat_at = now_ms;
        NodeState::Listening
    }

    fn do_listen(&mut self, now_ms: u64) -> NodeState {
        if now_ms.saturating_sub(self.last_heartbeat_at) >= self.config.heartbeat_ms {
            return NodeState::Heartbeat;
        }

        let mut window = std::mem::take(&mut self.window);
        let got_audio = match self.audio.read(&mut window) {
            Ok(got) => got,
            Err(e) => {
                // Transient; retry on the next tick.
                tracing::warn!(error = %e, "audio read failed");
                self.window = window;
                return NodeState::Listening;
            }
        };
        if !got_audio {
            self.window = window;
            return NodeState::Listening;
        }
        remove_dc(&mut window);

        let grid = match self.engine.generate(&window) {
            Ok(grid) => grid,
            Err(e) => {
                tracing::warn!(error = %e, "spectrogram failed");
                self.window = window;
                return NodeState::Listening;
            }
        };
        self.window = window;
        self.stats.windows_processed += 1;

        match self.gate.observe(&grid, now_ms) {
            GateDecision::Anomaly => {
                self.stats.anomalies_detected += 1;
                self.pending_grid = Some(grid);
                NodeState::AnomalyPending
            }
            GateDecision::Hit { count } => {
                tracing::debug!(count, "gate accumulating");
                NodeState::Listening
            }
            GateDecision::Quiet => NodeState::Listening,
        }
    }

    fn do_anomaly_pending(&mut self, _now_ms: u64) -> NodeState {
        // The gate has already enforced hit count and cooldown; commit.
        if self.pending_grid.is_some() {
            NodeState::Transmitting
        } else {
            NodeState::Listening
        }
    }

    fn do_transmit(&mut self, now_ms: u64) -> NodeState {
        let Some(grid) = self.pending_grid.take() else {
            return NodeState::Listening;
        };
        let confidence = (BandProfile::measure(&grid).energy * 100.0).round() as u8;
        match self.transmit_spectrogram(&grid, confidence) {
            Ok(packets) => {
                self.stats.spectrograms_sent += 1;
                tracing::info!(packets, confidence, "spectrogram transmitted");
            }
            Err(e) => {
                self.stats.tx_failures += 1;
                tracing::error!(error = %e, "spectrogram transmission failed, JSON fallback");
                let msg = NodeMessage::alert(
                    &self.config.node_id,
                    confidence,
                    self.config.lat,
                    self.config.lon,
                    self.battery.percent(),
                );
                if self.send_json(&msg).is_ok() {
                    self.stats.json_fallbacks += 1;
                    // Alerts get the same ACK window as heartbeats.
                    self.await_ack(now_ms);
                } else {
                    return NodeState::Error;
                }
            }
        }
        NodeState::Listening
    }

    fn do_heartbeat(&mut self, now_ms: u64) -> NodeState {
        let battery = self.battery.percent();
        let msg = NodeMessage::heartbeat(
            &self.config.node_id,
            battery,
            self.config.lat,
            self.config.lon,
            now_ms / 1000,
        );
        match self.send_json(&msg) {
            Ok(()) => {
                self.stats.heartbeats_sent += 1;
                self.last_heartbeat_at = now_ms;
                self.await_ack(now_ms);
            }
            Err(e) => {
                tracing::error!(error = %e, "heartbeat failed");
                self.last_heartbeat_at = now_ms;
                return NodeState::Error;
            }
        }
        NodeState::Listening
    }

    fn do_low_battery(&mut self, now_ms: u64) -> NodeState {
        let battery = self.battery.percent();
        let msg = NodeMessage::low_battery(&self.config.node_id, battery);
        if let Err(e) = self.send_json(&msg) {
            tracing::warn!(error = %e, "low battery notice failed");
        }
        self.radio.sleep();
        self.sleep_until = now_ms + self.config.sleep_secs * 1000;
        tracing::warn!(
            sleep_secs = self.config.sleep_secs,
            "entering deep sleep on low battery"
        );
        NodeState::Sleep
    }

    fn do_sleep(&mut self, now_ms: u64) -> NodeState {
        if now_ms >= self.sleep_until {
            self.radio.standby();
            NodeState::Boot
        } else {
            NodeState::Sleep
        }
    }

    /// Send one framed JSON telemetry packet.
    fn send_json(&mut self, msg: &NodeMessage) -> Result<()> {
        let body = msg.to_bytes()?;
        let pkt = Packet::json(self.node_hash, body)?;
        let bytes = pkt.to_bytes()?;
        self.radio.transmit(&bytes).map_err(NodeError::Radio)?;
        self.stats.packets_sent += 1;
        Ok(())
    }

    /// Transmit one spectrogram session: START, DATA chunks, END.
    fn transmit_spectrogram(&mut self, grid: &Grid, confidence: u8) -> Result<u64> {
        let payload = codec::encode(grid);
        let session_id = self.session_counter;
        self.session_counter = self.session_counter.wrapping_add(1);

        let chunks: Vec<&[u8]> = payload.chunks(MAX_CHUNK_LEN).collect();
        let mut sent: u64 = 0;

        let start = Packet::start(
            &self.config.node_id,
            session_id,
            chunks.len() as u8,
            payload.len() as u16,
        )?;
        self.radio
            .transmit(&start.to_bytes()?)
            .map_err(NodeError::Radio)?;
        sent += 1;

        for (seq, chunk) in chunks.iter().enumerate() {
            debug_assert!(chunk.len() <= MAX_CHUNK_LEN);
            let pkt = Packet::data(self.node_hash, session_id, seq as u8, chunk.to_vec())?;
            // A single DATA failure is not fatal; the hub tolerates loss
            // and the session can still complete from what arrives.
            match self.radio.transmit(&pkt.to_bytes()?) {
                Ok(()) => sent += 1,
                Err(e) => {
                    self.stats.tx_failures += 1;
                    tracing::warn!(seq, error = %e, "data packet failed");
                    // A dead link aborts the episode.
                    if matches!(e, guardian_radio::RadioError::NeedsReset) {
                        return Err(NodeError::Radio(e));
                    }
                }
            }
        }

        let metadata = EndMetadata {
            conf: confidence,
            lat: self.config.lat,
            lon: self.config.lon,
            bat: self.battery.percent(),
        };
        let end = Packet::end(self.node_hash, session_id, chunks.len() as u8, metadata);
        self.radio
            .transmit(&end.to_bytes()?)
            .map_err(NodeError::Radio)?;
        sent += 1;

        self.stats.packets_sent += sent;
        Ok(sent)
    }

    /// Listen briefly for a hub ACK after a heartbeat or alert.
    fn await_ack(&mut self, now_ms: u64) {
        let window = Duration::from_millis(self.config.ack_window_ms);
        for _ in 0..ACK_MAX_FRAMES {
            let frame = match self.radio.receive(window) {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(e) => {
                    tracing::warn!(error = %e, "ack receive failed");
                    return;
                }
            };
            if self.frame_is_ack(&frame) {
                self.hub_connected = true;
                self.last_ack_at = now_ms;
                tracing::info!(rssi = frame.rssi, "hub ACK received");
                return;
            }
        }
    }

    /// The deliberately loose ACK predicate: a framed packet matching our
    /// node hash, or any body carrying an ack marker.
    fn frame_is_ack(&self, frame: &Received) -> bool {
        match packet::classify_frame(&frame.bytes) {
            packet::FrameKind::Framed => match Packet::parse(&frame.bytes) {
                Ok(pkt) => {
                    pkt.header.node_hash == self.node_hash
                        && pkt.header.packet_type == PacketType::Json
                        && match pkt.body {
                            packet::PacketBody::Json { body } => {
                                messages::is_ack_for(&body, &self.config.node_id)
                            }
                            _ => false,
                        }
                }
                Err(_) => false,
            },
            packet::FrameKind::BareJson => {
                messages::is_ack_for(&frame.bytes, &self.config.node_id)
            }
            packet::FrameKind::Unrecognized => false,
        }
    }
}
