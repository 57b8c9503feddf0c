//! Integration test crate for the Forest Guardian pipeline.
//!
//! This crate has no production code; it holds shared test fixtures and
//! the integration tests that exercise end-to-end flows across the
//! workspace crates: node detection through radio framing, hub
//! reassembly, tiered classification, and the store.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use guardian_classify::{Classifier, ClassifyError, ClassifyInput};
use guardian_proto::codec;
use guardian_proto::packet::{self, Packet, MAX_CHUNK_LEN};
use guardian_types::{ClassificationResult, EndMetadata, Grid, Label};

/// A deterministic, non-trivial grid for sessions.
pub fn test_grid() -> Grid {
    let mut grid = Grid::new();
    for (i, px) in grid.as_mut_slice().iter_mut().enumerate() {
        *px = ((i * 13 + i / 32) % 256) as u8;
    }
    grid
}

/// Serialized frames for one complete session: START, DATA..., END.
pub fn session_frames(node_id: &str, session_id: u16, meta: EndMetadata) -> Vec<Vec<u8>> {
    let payload = codec::encode(&test_grid());
    frames_for_payload(node_id, session_id, &payload, meta)
}

/// Serialized frames carrying an arbitrary payload.
pub fn frames_for_payload(
    node_id: &str,
    session_id: u16,
    payload: &[u8],
    meta: EndMetadata,
) -> Vec<Vec<u8>> {
    let hash = packet::node_hash(node_id);
    let chunks: Vec<&[u8]> = payload.chunks(MAX_CHUNK_LEN).collect();
    let mut frames = Vec::new();
    frames.push(
        Packet::start(node_id, session_id, chunks.len() as u8, payload.len() as u16)
            .expect("start packet")
            .to_bytes()
            .expect("serialize start"),
    );
    for (seq, chunk) in chunks.iter().enumerate() {
        frames.push(
            Packet::data(hash, session_id, seq as u8, chunk.to_vec())
                .expect("data packet")
                .to_bytes()
                .expect("serialize data"),
        );
    }
    frames.push(
        Packet::end(hash, session_id, chunks.len() as u8, meta)
            .to_bytes()
            .expect("serialize end"),
    );
    frames
}

/// Standard END metadata used by the scenarios.
pub fn test_metadata() -> EndMetadata {
    EndMetadata {
        conf: 84,
        lat: 27.7172,
        lon: 85.3240,
        bat: 78,
    }
}

/// A scripted classifier tier that counts its calls.
pub struct MockTier {
    name: &'static str,
    pub calls: Arc<AtomicU32>,
    behavior: MockBehavior,
}

#[derive(Clone, Copy)]
pub enum MockBehavior {
    Verdict(Label, u8),
    Unreachable,
    BadResponse,
}

impl MockTier {
    pub fn new(name: &'static str, behavior: MockBehavior) -> (Box<dyn Classifier>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            Box::new(Self {
                name,
                calls: calls.clone(),
                behavior,
            }),
            calls,
        )
    }
}

impl Classifier for MockTier {
    fn name(&self) -> &'static str {
        self.name
    }

    fn classify(
        &self,
        _input: &ClassifyInput,
    ) -> guardian_classify::Result<ClassificationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            MockBehavior::Verdict(label, confidence) => {
                Ok(ClassificationResult::new(label, confidence))
            }
            MockBehavior::Unreachable => Err(ClassifyError::Unreachable("mock offline".into())),
            MockBehavior::BadResponse => Err(ClassifyError::BadResponse("mock garbage".into())),
        }
    }
}

/// A classifier whose behavior can be flipped mid-test (offline -> online).
pub struct SwitchableTier {
    name: &'static str,
    pub calls: Arc<AtomicU32>,
    online: Arc<std::sync::atomic::AtomicBool>,
    verdict: (Label, u8),
}

impl SwitchableTier {
    pub fn new(
        name: &'static str,
        verdict: (Label, u8),
    ) -> (
        Box<dyn Classifier>,
        Arc<std::sync::atomic::AtomicBool>,
        Arc<AtomicU32>,
    ) {
        let online = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let calls = Arc::new(AtomicU32::new(0));
        (
            Box::new(Self {
                name,
                calls: calls.clone(),
                online: online.clone(),
                verdict,
            }),
            online,
            calls,
        )
    }
}

impl Classifier for SwitchableTier {
    fn name(&self) -> &'static str {
        self.name
    }

    fn classify(
        &self,
        _input: &ClassifyInput,
    ) -> guardian_classify::Result<ClassificationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.online.load(Ordering::SeqCst) {
            Ok(ClassificationResult::new(self.verdict.0, self.verdict.1))
        } else {
            Err(ClassifyError::Unreachable("mock offline".into()))
        }
    }
}
