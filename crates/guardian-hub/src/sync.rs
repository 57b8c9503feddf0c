//! Offline queue draining.
//!
//! A single worker probes connectivity on a fixed cadence; whenever the
//! network is back and entries are pending, it re-classifies them in
//! FIFO order with the deep tier preferred and reports a
//! `sync_completed` event.

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use guardian_classify::{ClassifyInput, Dispatcher, Mode};

use crate::events::EventType;
use crate::store::Store;
use crate::{now_ms, png};

/// Hosts probed for connectivity (public DNS, port 53).
const PROBE_ADDRS: [&str; 2] = ["8.8.8.8:53", "1.1.1.1:53"];

/// Per-probe connect timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// TCP-level connectivity probe.
pub fn network_reachable() -> bool {
    for addr in PROBE_ADDRS {
        let Ok(parsed) = addr.parse::<SocketAddr>() else {
            continue;
        };
        if TcpStream::connect_timeout(&parsed, PROBE_TIMEOUT).is_ok() {
            return true;
        }
    }
    false
}

/// Run the sync worker until shutdown.
pub async fn run(
    store: Store,
    dispatcher: Arc<Dispatcher>,
    check_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!("sync worker started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(check_interval) => {}
            _ = shutdown.recv() => break,
        }

        let pending = match store.sync_pending_count().await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "sync queue count failed");
                continue;
            }
        };
        if pending == 0 {
            continue;
        }

        let online = tokio::task::spawn_blocking(network_reachable)
            .await
            .unwrap_or(false);
        if !online {
            tracing::debug!(pending, "offline, sync deferred");
            continue;
        }

        tracing::info!(pending, "connectivity restored, draining sync queue");
        let (synced, failed) = drain(&store, &dispatcher).await;
        store.bus().emit(
            EventType::SyncCompleted,
            serde_json::json!({"synced": synced, "failed": failed}),
        );
    }
    tracing::info!("sync worker stopped");
}

/// Drain the queue FIFO. Returns `(synced, failed)` counts.
pub async fn drain(store: &Store, dispatcher: &Arc<Dispatcher>) -> (u64, u64) {
    let mut synced = 0u64;
    let mut failed = 0u64;

    loop {
        let entry = match store.next_sync_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "sync queue read failed");
                break;
            }
        };

        match reverify(store, dispatcher, entry.spectrogram_id).await {
            Ok(true) => {
                if store.sync_entry_done(entry.rank).await.is_ok() {
                    synced += 1;
                }
            }
            Ok(false) => {
                // Still offline; stop draining, the next cycle retries.
                let _ = store
                    .sync_entry_failed(entry.rank, "cloud unreachable")
                    .await;
                failed += 1;
                break;
            }
            Err(e) => {
                tracing::error!(
                    spectrogram_id = entry.spectrogram_id,
                    error = %e,
                    "re-verification failed"
                );
                let _ = store.sync_entry_failed(entry.rank, &e.to_string()).await;
                failed += 1;
            }
        }
    }

    tracing::info!(synced, failed, "sync drain complete");
    (synced, failed)
}

/// Re-classify one stored spectrogram with the deep tier preferred.
/// Returns `Ok(false)` when the cloud is still unreachable.
async fn reverify(
    store: &Store,
    dispatcher: &Arc<Dispatcher>,
    spectrogram_id: i64,
) -> crate::Result<bool> {
    let record = store.get_spectrogram(spectrogram_id).await?;
    let grid = png::decode(&record.image_bytes)?;
    let input = ClassifyInput {
        png: record.image_bytes,
        grid,
    };

    let dispatcher_ref = dispatcher.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        dispatcher_ref.classify_with(Mode::Deep, &input, now_ms())
    })
    .await
    .map_err(|e| crate::HubError::Config(format!("sync join: {e}")))?;

    match outcome {
        Ok(outcome) if outcome.cloud_unreachable => Ok(false),
        Ok(outcome) => {
            store
                .apply_classification(spectrogram_id, &outcome.result, outcome.tier.as_str())
                .await?;
            Ok(true)
        }
        Err(e) => {
            tracing::warn!(spectrogram_id, error = %e, "re-verification dispatch failed");
            Ok(false)
        }
    }
}
