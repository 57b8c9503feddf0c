//! guardian-hub: the central gateway daemon.
//!
//! Task layout: one radio RX task feeding a bounded channel, one
//! reassembler task draining it serially with a coarse timeout tick, a
//! small classifier worker pool, one sync worker, and the HTTP surface.
//! Everything answers a shared shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use guardian_classify::cloud::{DeepCloudClassifier, FastCloudClassifier};
use guardian_classify::local::LocalClassifier;
use guardian_classify::{Classifier, Dispatcher};
use guardian_hub::config::HubConfig;
use guardian_hub::events::{EventBus, EventType};
use guardian_hub::reassembler::{Reassembler, ReassemblerConfig, ReassemblyEvent};
use guardian_hub::store::Store;
use guardian_hub::{http, now_ms, rx, sync, workers};
use guardian_radio::sim::SimulatedRadio;
use guardian_types::SpectrogramReceived;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guardian=info".parse()?),
        )
        .init();

    info!("Forest Guardian hub starting");

    // 1. Load config
    let config = HubConfig::load()?;
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    std::fs::create_dir_all(config.spectrogram_dir())?;

    // 2. Open database
    let db_path = data_dir.join(guardian_db::DB_FILE_NAME);
    let conn = guardian_db::open(&db_path)?;
    info!(path = %db_path.display(), "database open");

    // 3. Event bus + store
    let bus = EventBus::new(1000);
    let store = Store::new(conn, bus.clone());

    // 4. Classifier dispatcher
    let dispatcher = Arc::new(build_dispatcher(&config)?);
    info!(mode = dispatcher.mode().as_str(), services = ?dispatcher.services(), "dispatcher ready");

    // 5. Shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // 6. Radio RX task
    let (frame_tx, frame_rx) = mpsc::channel::<rx::RxFrame>(config.rx_queue_depth);
    if config.simulate {
        info!("no radio hardware configured, running the simulated network");
        let radio = SimulatedRadio::new(Duration::from_secs(15));
        tokio::spawn(rx::run(
            radio,
            frame_tx,
            shutdown_tx.subscribe(),
            config.radio,
        ));
    } else {
        // A hardware transceiver driver would be constructed here and
        // moved into the same task; everything downstream is identical.
        anyhow::bail!("no transceiver driver built in; set simulate = true");
    }

    // 7. Reassembler task + classifier queue
    let (work_tx, work_rx) = mpsc::channel::<SpectrogramReceived>(64);
    let reassembler_task = tokio::spawn(run_reassembler(
        frame_rx,
        work_tx,
        store.clone(),
        ReassemblerConfig {
            session_timeout_ms: config.session_timeout_s * 1000,
            session_cap: config.session_cap,
            permissive: config.permissive_sessions,
        },
        shutdown_tx.subscribe(),
    ));

    // 8. Classifier workers
    let worker_handles = workers::spawn_pool(
        config.classify_workers,
        work_rx,
        store.clone(),
        dispatcher.clone(),
        config.spectrogram_dir(),
        shutdown_tx.clone(),
    );

    // 9. Sync worker
    tokio::spawn(sync::run(
        store.clone(),
        dispatcher.clone(),
        Duration::from_secs(config.sync_check_interval_s),
        shutdown_tx.subscribe(),
    ));

    // 10. HTTP surface
    let app = http::router(http::AppState {
        store: store.clone(),
        dispatcher: dispatcher.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&config.http_listen).await?;
    info!(listen = %config.http_listen, "http surface up");
    let http_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            error!(error = %e, "http server error");
        }
    });

    // 11. Run until ctrl-c
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    // Workers finish their current item; in-flight sessions are dropped.
    let _ = reassembler_task.await;
    for handle in worker_handles {
        let _ = handle.await;
    }
    http_task.abort();

    info!("hub stopped");
    Ok(())
}

/// Build the tier stack from config. Empty endpoints disable a tier.
fn build_dispatcher(config: &HubConfig) -> anyhow::Result<Dispatcher> {
    let fast: Option<Box<dyn Classifier>> = if config.fast_cloud_endpoint.is_empty() {
        None
    } else {
        Some(Box::new(FastCloudClassifier::new(
            config.fast_cloud_endpoint.clone(),
            config.fast_cloud_key.clone(),
        )?))
    };
    let deep: Option<Box<dyn Classifier>> = if config.deep_cloud_endpoint.is_empty() {
        None
    } else {
        Some(Box::new(DeepCloudClassifier::new(
            config.deep_cloud_endpoint.clone(),
            config.deep_cloud_key.clone(),
            config.deep_cloud_model.clone(),
        )?))
    };
    Ok(Dispatcher::new(
        config.ai_mode,
        Box::new(LocalClassifier::new()),
        fast,
        deep,
        config.deep_rate_limit,
        config.deep_rate_window_s * 1000,
    ))
}

/// The reassembler task: drains the RX channel serially and evaluates
/// timeouts once a second.
async fn run_reassembler(
    mut frames: mpsc::Receiver<rx::RxFrame>,
    work_tx: mpsc::Sender<SpectrogramReceived>,
    store: Store,
    config: ReassemblerConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut reassembler = Reassembler::new(config);
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    info!("reassembler task started");

    loop {
        let events = tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => reassembler.on_packet(&frame.bytes, frame.rssi, now_ms()),
                None => break,
            },
            _ = tick.tick() => reassembler.tick(now_ms()),
            _ = shutdown.recv() => break,
        };

        for event in events {
            handle_event(event, &store, &work_tx).await;
        }
    }

    info!(
        in_flight = reassembler.in_flight(),
        stats = ?reassembler.stats,
        "reassembler task stopped, in-flight sessions discarded"
    );
}

async fn handle_event(
    event: ReassemblyEvent,
    store: &Store,
    work_tx: &mpsc::Sender<SpectrogramReceived>,
) {
    match event {
        ReassemblyEvent::Telemetry { message, rssi } => {
            if let Err(e) = store.ingest_telemetry(&message, rssi).await {
                error!(error = %e, "telemetry ingest failed");
            }
        }
        ReassemblyEvent::Completed(spec) => {
            if work_tx.send(spec).await.is_err() {
                error!("classifier queue closed, spectrogram dropped");
            }
        }
        ReassemblyEvent::Partial {
            node_id,
            session_id,
            metadata,
            rssi_max,
            raw,
            error: decode_error,
        } => {
            if let Err(e) = store
                .insert_partial(&node_id, session_id, &metadata, rssi_max, &raw, &decode_error)
                .await
            {
                error!(error = %e, "partial spectrogram persist failed");
            }
        }
        ReassemblyEvent::Abandoned {
            key,
            received,
            expected,
        } => {
            store.bus().emit(
                EventType::SessionAbandoned,
                serde_json::json!({
                    "node_hash": key.0,
                    "session_id": key.1,
                    "received": received,
                    "expected": expected,
                }),
            );
        }
        ReassemblyEvent::Overwritten { key } => {
            tracing::warn!(?key, "session overwritten by new START");
        }
    }
}
