//! The radio RX task.
//!
//! Exclusively owns the hub transceiver: blocks on `receive`, answers
//! heartbeats and alerts with an ACK (the only non-receive radio use),
//! and forwards every frame into the bounded channel the reassembler
//! drains. Never classifies, never touches the store.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use guardian_proto::messages::{self, NodeMessage};
use guardian_proto::packet::{classify_frame, FrameKind, Packet, PacketBody, PacketType};
use guardian_radio::RadioLink;

/// A frame handed to the reassembler.
#[derive(Debug)]
pub struct RxFrame {
    pub bytes: Vec<u8>,
    pub rssi: i16,
}

/// Per-receive blocking bound so the shutdown signal is honored.
const RECEIVE_SLICE: Duration = Duration::from_millis(500);

/// Run the RX loop until shutdown. The radio is moved in; nothing else
/// may touch it.
pub async fn run<R>(
    mut radio: R,
    tx: mpsc::Sender<RxFrame>,
    mut shutdown: broadcast::Receiver<()>,
    params: guardian_radio::RadioParams,
) where
    R: RadioLink + Send + 'static,
{
    tracing::info!(
        freq_mhz = params.freq_mhz,
        sf = params.spreading_factor,
        sync_word = format_args!("{:#04x}", params.sync_word),
        "radio RX task started"
    );

    loop {
        if shutdown.try_recv().is_ok() {
            break;
        }

        // The blocking receive runs on the blocking pool so the runtime
        // keeps breathing; the slice bounds how long shutdown waits.
        let received = tokio::task::block_in_place(|| radio.receive(RECEIVE_SLICE));

        match received {
            Ok(Some(frame)) => {
                maybe_ack(&mut radio, &frame.bytes);
                let rx_frame = RxFrame {
                    bytes: frame.bytes,
                    rssi: frame.rssi,
                };
                match tx.try_send(rx_frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!("rx queue full, dropping frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
            Ok(None) => {
                // Timeout; yield so shutdown and other tasks progress.
                tokio::task::yield_now().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "radio receive failed, resetting link");
                if let Err(e) = radio.reset(params) {
                    tracing::error!(error = %e, "radio reset failed, backing off");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    radio.standby();
    tracing::info!("radio RX task stopped");
}

/// Answer node heartbeats and alerts so the node's `hub_connected` flag
/// tracks reality. Best effort; a failed ACK transmit is logged only.
fn maybe_ack<R: RadioLink>(radio: &mut R, bytes: &[u8]) {
    let message = match classify_frame(bytes) {
        FrameKind::Framed => match Packet::parse(bytes) {
            Ok(Packet {
                body: PacketBody::Json { body },
                header,
            }) if header.packet_type == PacketType::Json => NodeMessage::parse(&body).ok(),
            _ => None,
        },
        FrameKind::BareJson => NodeMessage::parse(bytes).ok(),
        FrameKind::Unrecognized => None,
    };

    let Some(message) = message else { return };
    if !matches!(
        message.kind,
        guardian_proto::messages::MessageKind::Heartbeat
            | guardian_proto::messages::MessageKind::Alert
    ) {
        return;
    }

    let hash = guardian_proto::packet::node_hash(&message.node_id);
    let ack = match Packet::json(hash, messages::ack_body(&message.node_id)) {
        Ok(pkt) => pkt,
        Err(_) => return,
    };
    let Ok(ack_bytes) = ack.to_bytes() else { return };
    if let Err(e) = radio.transmit(&ack_bytes) {
        tracing::warn!(error = %e, node_id = %message.node_id, "ack transmit failed");
    } else {
        tracing::debug!(node_id = %message.node_id, "ack sent");
    }
}
