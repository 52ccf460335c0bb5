use std::time::{Duration, SystemTime, UNIX_EPOCH};

use quizduel_shared::document::Timestamp;
use quizduel_shared::protocol::SnapshotMsg;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::store::{write_snapshot, Commit, DocumentStore, StoreError, Write};

/// Commands from client connections to the store loop
pub enum StoreCommand {
    Get {
        key: String,
        response: oneshot::Sender<SnapshotMsg>,
    },
    Write {
        key: String,
        write: Write,
        response: oneshot::Sender<Result<Commit, StoreError>>,
    },
}

/// Broadcasts from the store loop to all connections
#[derive(Debug, Clone)]
pub enum StoreBroadcast {
    Changed(SnapshotMsg),
}

/// Wall clock in milliseconds since the Unix epoch.
pub fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

/// Snapshot of a key; a missing key is version 0 with no document.
pub fn snapshot_of(store: &DocumentStore, key: &str) -> SnapshotMsg {
    match store.get(key) {
        Some(stored) => SnapshotMsg {
            key: key.to_string(),
            version: stored.version,
            doc: Some(stored.doc.clone()),
        },
        None => SnapshotMsg {
            key: key.to_string(),
            version: 0,
            doc: None,
        },
    }
}

/// Build the store, loading the data file when one is configured.
pub fn open_store(config: &ServerConfig) -> Result<DocumentStore, StoreError> {
    let mut store = DocumentStore::new(config.max_document_bytes);
    if let Some(path) = &config.data_file {
        let loaded = store.load(path)?;
        tracing::info!("Loaded {} documents from {}", loaded, path.display());
    }
    Ok(store)
}

/// Run the store loop. Owns the document store; commits happen one at a time
/// in command order.
pub async fn run_store_loop(
    mut store: DocumentStore,
    mut cmd_rx: mpsc::Receiver<StoreCommand>,
    broadcast_tx: broadcast::Sender<StoreBroadcast>,
    config: ServerConfig,
) {
    let flush_every = Duration::from_millis(config.flush_interval_ms.max(1));
    let mut flush_interval = tokio::time::interval(flush_every);
    flush_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut pending_flush: Option<JoinHandle<bool>> = None;

    loop {
        tokio::select! {
            _ = flush_interval.tick() => {
                // One flush in flight at a time; a slow disk just delays the next.
                if !pending_flush.as_ref().is_some_and(|t| !t.is_finished()) {
                    finish_flush(&mut store, pending_flush.take()).await;
                    pending_flush = start_flush(&mut store, &config);
                }
            }

            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    StoreCommand::Get { key, response } => {
                        let _ = response.send(snapshot_of(&store, &key));
                    }
                    StoreCommand::Write { key, write, response } => {
                        let result = store.write(&key, write, now_ms());
                        match &result {
                            Ok(commit) => {
                                tracing::debug!("Committed {} v{}", commit.key, commit.version);
                                let _ = broadcast_tx.send(StoreBroadcast::Changed(SnapshotMsg {
                                    key: commit.key.clone(),
                                    version: commit.version,
                                    doc: Some(commit.doc.clone()),
                                }));
                            }
                            Err(e) => tracing::debug!("Rejected write to {}: {}", key, e),
                        }
                        let _ = response.send(result);
                    }
                }
            }
        }
    }

    finish_flush(&mut store, pending_flush.take()).await;
    let last = start_flush(&mut store, &config);
    finish_flush(&mut store, last).await;
    tracing::info!("Store loop ended ({} documents)", store.len());
}

/// Write a copy of the changed documents on the blocking pool so commits
/// keep flowing while the file is written.
fn start_flush(store: &mut DocumentStore, config: &ServerConfig) -> Option<JoinHandle<bool>> {
    let path = config.data_file.clone()?;
    let docs = store.take_dirty()?;
    Some(tokio::task::spawn_blocking(move || {
        match write_snapshot(&path, &docs) {
            Ok(()) => {
                tracing::debug!("Flushed {} documents to {}", docs.len(), path.display());
                true
            }
            Err(e) => {
                tracing::error!("Failed to flush {}: {}", path.display(), e);
                false
            }
        }
    }))
}

/// Wait for a flush; on failure the store stays dirty for the next one.
async fn finish_flush(store: &mut DocumentStore, task: Option<JoinHandle<bool>>) {
    let Some(task) = task else {
        return;
    };
    match task.await {
        Ok(true) => {}
        Ok(false) => store.mark_dirty(),
        Err(e) => {
            tracing::error!("Flush task failed: {}", e);
            store.mark_dirty();
        }
    }
}
