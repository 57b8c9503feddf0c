//! Integration tests: store write-then-read laws and event ordering.

use guardian_hub::events::{EventBus, EventType};
use guardian_hub::store::Store;
use guardian_hub::{png, workers};
use guardian_integration_tests::{test_grid, test_metadata, MockBehavior, MockTier};
use guardian_classify::{Dispatcher, Mode};
use guardian_proto::messages::NodeMessage;
use guardian_types::{Label, SpectrogramReceived, ThreatLevel};
use std::sync::Arc;

fn test_store() -> Store {
    let conn = guardian_db::open_memory().expect("open");
    Store::new(conn, EventBus::new(256))
}

fn spec_received() -> SpectrogramReceived {
    SpectrogramReceived {
        node_id: "GUARDIAN_001".to_string(),
        grid: test_grid(),
        metadata: test_metadata(),
        rssi_max: -72,
        session_id: 42,
        truncated: false,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn full_pipeline_write_then_read() {
    let store = test_store();
    let mut events = store.bus().subscribe();

    let (fast, _) = MockTier::new("fast_cloud", MockBehavior::Verdict(Label::Chainsaw, 91));
    let (local, _) = MockTier::new("local", MockBehavior::Verdict(Label::Natural, 50));
    let dispatcher = Arc::new(Dispatcher::new(
        Mode::Auto,
        local,
        Some(fast),
        None,
        5,
        900_000,
    ));

    let dir = std::env::temp_dir().join("guardian-store-test");
    workers::process(&store, &dispatcher, &dir, spec_received())
        .await
        .expect("process");

    // Reading back returns the record just written, classification
    // included.
    let specs = store.list_spectrograms(10).await.expect("list");
    assert_eq!(specs.len(), 1);
    let record = store.get_spectrogram(specs[0].id).await.expect("get");
    assert_eq!(record.node_id, "GUARDIAN_001");
    assert_eq!(record.classification, Some(Label::Chainsaw));
    assert_eq!(record.confidence, Some(91));
    assert_eq!(record.threat_level, Some(ThreatLevel::Critical));
    assert_eq!(record.classifier_used.as_deref(), Some("fast_cloud"));
    assert_eq!(record.session_id, 42);
    assert_eq!(record.rssi, -72);

    // The stored PNG decodes back to the reconstructed grid.
    let grid = png::decode(&record.image_bytes).expect("decode");
    assert_eq!(grid, test_grid());

    // CRITICAL classification produced exactly one alert.
    let alerts = store.list_alerts(10).await.expect("list");
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].spectrogram_id, Some(record.id));
    assert_eq!(alerts[0].confidence, 91);

    // Event order matches write order.
    let order: Vec<EventType> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.event_type)
        .collect();
    assert_eq!(
        order,
        vec![
            EventType::NewSpectrogram,
            EventType::SpectrogramAnalyzed,
            EventType::NewAlert,
        ]
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn node_upsert_is_never_a_duplicate_failure() {
    let store = test_store();
    let hb = NodeMessage::heartbeat("GUARDIAN_009", 70, 1.0, 2.0, 100);
    for _ in 0..5 {
        store.ingest_telemetry(&hb, -95).await.expect("ingest");
    }
    let nodes = store.list_nodes().await.expect("list");
    assert_eq!(nodes.len(), 1);
}

#[tokio::test]
async fn respond_marks_alert() {
    let store = test_store();
    let alert = NodeMessage::alert("GUARDIAN_003", 77, 0.5, 0.5, 55);
    store.ingest_telemetry(&alert, -80).await.expect("ingest");

    let alerts = store.list_alerts(10).await.expect("list");
    let id = alerts[0].id;
    store.respond_alert(id, "ranger-2").await.expect("respond");

    let alerts = store.list_alerts(10).await.expect("list");
    assert!(alerts[0].responded);
    assert_eq!(alerts[0].responded_by.as_deref(), Some("ranger-2"));
}

#[tokio::test]
async fn partial_spectrogram_surfaces_with_reduced_confidence() {
    let store = test_store();
    let mut events = store.bus().subscribe();

    let raw = vec![0xBA, 0xD0, 0x00, 0x01];
    let id = store
        .insert_partial(
            "GUARDIAN_004",
            9,
            &test_metadata(),
            -101,
            &raw,
            "bad payload header",
        )
        .await
        .expect("insert partial");

    let record = store.get_spectrogram(id).await.expect("get");
    assert!(record.truncated);
    assert_eq!(record.image_bytes, raw);
    assert_eq!(record.anomaly_score, 84);

    // Node-side score of 84 is alert-worthy despite the failed decode.
    let alerts = store.list_alerts(10).await.expect("list");
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].analysis_text.contains("undecodable"));

    let order: Vec<EventType> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.event_type)
        .collect();
    assert_eq!(order, vec![EventType::NewSpectrogram, EventType::NewAlert]);
}

#[tokio::test]
async fn recent_alert_listing_caps_at_100() {
    let store = test_store();
    for i in 0..110u64 {
        let mut msg = NodeMessage::alert("GUARDIAN_005", 70, 0.0, 0.0, 80);
        msg.timestamp = Some(i);
        store.ingest_telemetry(&msg, -90).await.expect("ingest");
    }
    let alerts = store.list_alerts(100).await.expect("list");
    assert_eq!(alerts.len(), 100);
}
