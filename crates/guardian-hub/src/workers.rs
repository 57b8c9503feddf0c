//! The classifier worker pool.
//!
//! A small pool drains a queue of completed reassemblies. Each worker
//! renders the PNG, runs the blocking dispatcher off the async runtime,
//! and writes results through the store. Classification order is not
//! guaranteed to match receive order.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex};

use guardian_classify::{ClassifyInput, Dispatcher};
use guardian_types::SpectrogramReceived;

use crate::store::Store;
use crate::{now_ms, png};

/// Spawn `count` workers sharing one queue receiver. Returns their join
/// handles; each worker finishes its current item on shutdown.
pub fn spawn_pool(
    count: usize,
    queue: mpsc::Receiver<SpectrogramReceived>,
    store: Store,
    dispatcher: Arc<Dispatcher>,
    spectrogram_dir: PathBuf,
    shutdown: broadcast::Sender<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let queue = Arc::new(Mutex::new(queue));
    (0..count)
        .map(|worker_id| {
            let queue = queue.clone();
            let store = store.clone();
            let dispatcher = dispatcher.clone();
            let dir = spectrogram_dir.clone();
            let mut shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                tracing::info!(worker_id, "classifier worker started");
                loop {
                    let item = {
                        let mut rx = queue.lock().await;
                        tokio::select! {
                            item = rx.recv() => item,
                            _ = shutdown.recv() => None,
                        }
                    };
                    let Some(spec) = item else { break };
                    if let Err(e) = process(&store, &dispatcher, &dir, spec).await {
                        tracing::error!(worker_id, error = %e, "classification item failed");
                    }
                }
                tracing::info!(worker_id, "classifier worker stopped");
            })
        })
        .collect()
}

/// Handle one completed spectrogram end to end: persist, classify,
/// alert, and queue for re-verification when offline.
pub async fn process(
    store: &Store,
    dispatcher: &Arc<Dispatcher>,
    spectrogram_dir: &std::path::Path,
    spec: SpectrogramReceived,
) -> crate::Result<()> {
    let png_bytes = png::render(&spec.grid)?;
    let id = store.insert_spectrogram(&spec, &png_bytes).await?;
    if let Err(e) = png::save(spectrogram_dir, id, &png_bytes) {
        // The DB copy is canonical; a missing file only degrades the UI.
        tracing::warn!(id, error = %e, "spectrogram file write failed");
    }

    let input = ClassifyInput {
        png: png_bytes,
        grid: spec.grid.clone(),
    };
    let dispatcher_ref = dispatcher.clone();
    let outcome = tokio::task::spawn_blocking(move || dispatcher_ref.classify(&input, now_ms()))
        .await
        .map_err(|e| crate::HubError::Config(format!("worker join: {e}")))?;

    match outcome {
        Ok(outcome) => {
            store.apply_outcome(id, &spec, &outcome).await?;
            if outcome.cloud_unreachable {
                tracing::info!(id, "cloud unreachable, queueing for re-verification");
                store.enqueue_sync(id).await?;
            }
        }
        Err(e) => {
            tracing::error!(id, error = %e, "all classification tiers failed");
            store.mark_unclassified(id).await?;
        }
    }
    Ok(())
}
