//! guardian-node: the sensor node loop.
//!
//! Without real I2S and LoRa hardware attached this binary runs in
//! simulation mode: synthetic audio into the real detection pipeline,
//! with transmissions delivered to an in-process peer that logs what a
//! hub would receive.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use guardian_dsp::capture::SyntheticSource;
use guardian_node::battery::FixedBattery;
use guardian_node::{NodeConfig, NodeScheduler};
use guardian_proto::packet::Packet;
use guardian_radio::loopback::LoopbackRadio;
use guardian_radio::RadioLink;
use guardian_types::SAMPLE_RATE;
use tracing::{info, warn};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guardian=info".parse()?),
        )
        .init();

    let config = NodeConfig::load()?;
    info!(
        node_id = %config.node_id,
        profile = %config.anomaly_profile,
        freq_mhz = config.radio.freq_mhz,
        sf = config.radio.spreading_factor,
        "node starting in simulation mode"
    );

    let audio = if std::env::var("SIMULATE_CHAINSAW").is_ok() {
        warn!("SIMULATE_CHAINSAW set: feeding chainsaw audio");
        SyntheticSource::chainsaw(SAMPLE_RATE)
    } else {
        SyntheticSource::ambient(SAMPLE_RATE)
    };

    let (node_end, mut hub_end) = LoopbackRadio::pair();
    let mut scheduler = NodeScheduler::new(config, audio, node_end, FixedBattery(3.9));

    loop {
        let state = scheduler.tick(now_ms());
        tracing::trace!(?state, "tick");

        // Show what a hub would be hearing.
        while let Ok(Some(frame)) = hub_end.receive(Duration::from_millis(1)) {
            match Packet::parse(&frame.bytes) {
                Ok(pkt) => info!(
                    packet_type = ?pkt.header.packet_type,
                    session = pkt.header.session_id,
                    seq = pkt.header.seq,
                    len = frame.bytes.len(),
                    "on air"
                ),
                Err(e) => warn!(error = %e, "unparseable frame on air"),
            }
        }

        std::thread::sleep(Duration::from_millis(250));
    }
}
